//! Scripted load against a sync context backed by a flaky in-memory remote.
//!
//! The simulator issues a burst of creates, edits and deletes, then syncs
//! until the queue drains or the round limit is reached. Faults are drawn
//! from a seeded generator so a run can be reproduced exactly.

mod flaky;

pub use flaky::{FaultCounts, FaultPlan, FlakyConnector, FlakyService};

use anyhow::{Context, Result};
use holdfast_batch::BatcherConfig;
use holdfast_core::{ContextStatus, HoldfastConfig, SyncContext, SyncReport};
use holdfast_pool::PoolConfig;
use holdfast_remote::{MemoryConnector, MemoryRemote};
use holdfast_store::MemoryStore;
use holdfast_types::{EntityKind, RecordId};
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Knobs of one simulated run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Scenario {
    pub actor: String,
    /// Rows created in the burst.
    pub operations: usize,
    /// Chance a data call is dropped.
    pub fail_rate: f64,
    /// Chance a data call is rate limited.
    pub rate_limit_rate: f64,
    /// Sync passes attempted before giving up.
    pub rounds: usize,
    pub seed: u64,
}

impl Default for Scenario {
    fn default() -> Self {
        Self {
            actor: "sim-user".into(),
            operations: 20,
            fail_rate: 0.1,
            rate_limit_rate: 0.02,
            rounds: 5,
            seed: 7,
        }
    }
}

/// What a run ended with.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioOutcome {
    pub scenario: Scenario,
    pub rounds_run: usize,
    pub drained: bool,
    pub faults: FaultCounts,
    pub reports: Vec<SyncReport>,
    /// Rows on the backend per table.
    pub remote_rows: BTreeMap<String, usize>,
    /// Rows visible through the context's read path per table.
    pub visible_rows: BTreeMap<String, usize>,
    pub status: ContextStatus,
}

/// Timings short enough for an interactive run. A loaded config file
/// replaces them entirely.
pub fn interactive_config() -> HoldfastConfig {
    HoldfastConfig::default()
        .with_batcher(
            BatcherConfig::default()
                .with_batch_delay(Duration::from_millis(10))
                .with_retry(3, Duration::from_millis(50))
                .with_rate_limit_cooldown(Duration::from_millis(500)),
        )
        .with_pool(
            PoolConfig::default()
                .with_bounds(1, 4)
                .with_acquire_timeout(Duration::from_secs(2)),
        )
        .with_cache_storage_key(None)
}

/// Runs `scenario` against a fresh in-memory backend.
pub async fn run_scenario(config: HoldfastConfig, scenario: Scenario) -> Result<ScenarioOutcome> {
    let remote = MemoryRemote::new();
    let plan = Arc::new(FaultPlan::new(
        scenario.fail_rate,
        scenario.rate_limit_rate,
        scenario.seed,
    ));
    let connector = FlakyConnector::new(MemoryConnector::new(remote.clone()), plan.clone());
    let ctx = SyncContext::builder(Arc::new(MemoryStore::new()), Arc::new(connector))
        .config(config)
        .build()
        .context("failed to build sync context")?;
    ctx.initialize()
        .await
        .context("failed to open initial connections")?;
    let _background = ctx.start_background();

    let actor = scenario.actor.as_str();
    burst(&ctx, actor, scenario.operations)?;
    info!(
        queued = ctx.queue().pending_count(),
        operations = scenario.operations,
        "burst recorded"
    );

    let mut reports = Vec::new();
    for round in 1..=scenario.rounds {
        let report = ctx.sync(actor).await.context("sync pass failed")?;
        debug!(round, synced = report.synced, failed = report.failed, "round finished");
        reports.push(report);
        if ctx.queue().pending_count() == 0 {
            break;
        }
    }
    let drained = ctx.queue().pending_count() == 0;
    if !drained {
        warn!(pending = ctx.queue().pending_count(), "queue not drained within round limit");
    }

    let mut remote_rows = BTreeMap::new();
    let mut visible_rows = BTreeMap::new();
    for kind in EntityKind::ALL {
        remote_rows.insert(kind.table().to_string(), remote.rows(kind.table()).len());
        match ctx.read(actor, kind, Default::default()).await {
            Ok(rows) => {
                visible_rows.insert(kind.table().to_string(), rows.len());
            }
            Err(e) => warn!(table = kind.table(), error = %e, "final read failed"),
        }
    }

    let outcome = ScenarioOutcome {
        rounds_run: reports.len(),
        drained,
        faults: plan.counts(),
        reports,
        remote_rows,
        visible_rows,
        status: ctx.status(),
        scenario,
    };
    ctx.shutdown().context("shutdown failed")?;
    Ok(outcome)
}

/// Creates `operations` rows spread over every kind, edits every third
/// one and deletes every fifth.
fn burst(ctx: &SyncContext, actor: &str, operations: usize) -> Result<()> {
    let mut created: Vec<(EntityKind, RecordId)> = Vec::with_capacity(operations);
    for i in 0..operations {
        let kind = EntityKind::ALL[i % EntityKind::ALL.len()];
        let update = ctx.create(actor, kind, json!({"title": format!("{kind} #{i}")}))?;
        created.push((kind, update.id));

        if i % 3 == 2 {
            let (kind, id) = &created[i - 1];
            ctx.update(actor, *kind, id, json!({"title": format!("{kind} #{} (edited)", i - 1)}))?;
        }
        if i % 5 == 4 {
            let (kind, id) = &created[i - 4];
            ctx.remove(actor, *kind, id)?;
        }
    }
    Ok(())
}
