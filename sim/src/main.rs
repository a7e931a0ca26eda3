//! Holdfast sync simulator
//!
//! Drives a sync context against an in-memory backend that drops and rate
//! limits a share of calls, then prints the outcome as JSON.
//!
//! Usage:
//!   holdfast-sim --operations 50 --fail-rate 0.2 --rounds 8

use anyhow::Result;
use clap::Parser;
use holdfast_core::HoldfastConfig;
use holdfast_sim::{Scenario, interactive_config, run_scenario};
use std::path::PathBuf;
use tracing::{Level, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "holdfast-sim")]
#[command(about = "Simulate offline-first sync against a flaky backend")]
struct Args {
    /// JSON configuration file (defaults to short interactive timings)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Rows to create in the burst
    #[arg(short, long, default_value = "20")]
    operations: usize,

    /// Share of data calls that fail with a dropped connection
    #[arg(long, default_value = "0.1")]
    fail_rate: f64,

    /// Share of data calls that are rate limited
    #[arg(long, default_value = "0.02")]
    rate_limit_rate: f64,

    /// Sync passes before giving up
    #[arg(short, long, default_value = "5")]
    rounds: usize,

    /// Seed for the fault generator
    #[arg(long, default_value = "7")]
    seed: u64,

    /// User the mutations are made as
    #[arg(long, default_value = "sim-user")]
    actor: String,

    /// Enable verbose debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.as_str().to_ascii_lowercase()));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let config = match &args.config {
        Some(path) => HoldfastConfig::from_json_file(path)?,
        None => interactive_config(),
    };
    let scenario = Scenario {
        actor: args.actor,
        operations: args.operations,
        fail_rate: args.fail_rate,
        rate_limit_rate: args.rate_limit_rate,
        rounds: args.rounds,
        seed: args.seed,
    };

    info!(operations = scenario.operations, fail_rate = scenario.fail_rate, "simulation starting");
    let outcome = run_scenario(config, scenario).await?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}
