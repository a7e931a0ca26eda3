//! Fault injection in front of the in-memory backend.

use async_trait::async_trait;
use holdfast_remote::{
    Filter, MemoryConnector, RemoteConnector, RemoteError, RemoteResult, RemoteService,
};
use holdfast_types::lock;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Probabilities of injected failures per data call.
#[derive(Debug)]
pub struct FaultPlan {
    fail_rate: f64,
    rate_limit_rate: f64,
    rng: Mutex<StdRng>,
    dropped: AtomicU64,
    rate_limited: AtomicU64,
}

/// How many faults were injected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FaultCounts {
    pub dropped: u64,
    pub rate_limited: u64,
}

impl FaultPlan {
    /// Rates are clamped to `[0, 1]`. The same seed yields the same faults
    /// for the same call sequence.
    pub fn new(fail_rate: f64, rate_limit_rate: f64, seed: u64) -> Self {
        Self {
            fail_rate: fail_rate.clamp(0.0, 1.0),
            rate_limit_rate: rate_limit_rate.clamp(0.0, 1.0),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            dropped: AtomicU64::new(0),
            rate_limited: AtomicU64::new(0),
        }
    }

    pub fn counts(&self) -> FaultCounts {
        FaultCounts {
            dropped: self.dropped.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
        }
    }

    fn roll(&self, op: &str, table: &str) -> RemoteResult<()> {
        let draw: f64 = lock(&self.rng).r#gen();
        if draw < self.rate_limit_rate {
            self.rate_limited.fetch_add(1, Ordering::Relaxed);
            debug!(op, table, "injecting rate limit");
            return Err(RemoteError::http(429, "simulated rate limit"));
        }
        if draw < self.rate_limit_rate + self.fail_rate {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            debug!(op, table, "injecting network drop");
            return Err(RemoteError::Network("simulated connection drop".into()));
        }
        Ok(())
    }
}

/// A remote handle that fails calls according to a shared [`FaultPlan`].
pub struct FlakyService {
    inner: Arc<dyn RemoteService>,
    plan: Arc<FaultPlan>,
}

#[async_trait]
impl RemoteService for FlakyService {
    async fn insert(&self, table: &str, row: Value) -> RemoteResult<Value> {
        self.plan.roll("insert", table)?;
        self.inner.insert(table, row).await
    }

    async fn update(&self, table: &str, filter: &Filter, patch: Value) -> RemoteResult<Vec<Value>> {
        self.plan.roll("update", table)?;
        self.inner.update(table, filter, patch).await
    }

    async fn delete(&self, table: &str, filter: &Filter) -> RemoteResult<Vec<Value>> {
        self.plan.roll("delete", table)?;
        self.inner.delete(table, filter).await
    }

    async fn select(&self, table: &str, filter: &Filter) -> RemoteResult<Vec<Value>> {
        self.plan.roll("select", table)?;
        self.inner.select(table, filter).await
    }

    // Health probes bypass the plan so the pool keeps its connections.
    async fn ping(&self) -> RemoteResult<()> {
        self.inner.ping().await
    }
}

/// Connector handing out [`FlakyService`] handles.
pub struct FlakyConnector {
    inner: MemoryConnector,
    plan: Arc<FaultPlan>,
}

impl FlakyConnector {
    pub fn new(inner: MemoryConnector, plan: Arc<FaultPlan>) -> Self {
        Self { inner, plan }
    }
}

#[async_trait]
impl RemoteConnector for FlakyConnector {
    async fn connect(&self) -> RemoteResult<Arc<dyn RemoteService>> {
        let inner = self.inner.connect().await?;
        Ok(Arc::new(FlakyService {
            inner,
            plan: self.plan.clone(),
        }))
    }
}
