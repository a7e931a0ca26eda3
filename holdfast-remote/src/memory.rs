//! In-memory remote service with fault injection.
//!
//! Every handle produced by [`MemoryConnector`] shares one backend, so a
//! test can seed rows, script failures, and inspect the call log no matter
//! which pooled connection performed the call.

use crate::error::{RemoteError, RemoteResult};
use crate::filter::Filter;
use crate::service::{RemoteConnector, RemoteService};
use async_trait::async_trait;
use holdfast_types::json::{ID_FIELD, merge_shallow, record_id_of, set_record_id};
use holdfast_types::{RecordId, lock};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::debug;

/// The kind of call made against the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteOp {
    Insert,
    Update,
    Delete,
    Select,
    Ping,
    Connect,
}

/// One entry in the backend's call log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRecord {
    pub op: RemoteOp,
    pub table: String,
}

#[derive(Debug, Clone)]
struct Fault {
    op: Option<RemoteOp>,
    error: RemoteError,
}

impl Fault {
    fn applies_to(&self, op: RemoteOp) -> bool {
        self.op.is_none_or(|o| o == op)
    }
}

#[derive(Debug, Default)]
struct Backend {
    tables: Mutex<HashMap<String, Vec<Value>>>,
    one_shot: Mutex<VecDeque<Fault>>,
    sticky: Mutex<Vec<Fault>>,
    calls: Mutex<Vec<CallRecord>>,
    latency: Mutex<Duration>,
    next_id: AtomicU64,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

/// An in-memory [`RemoteService`]. Cloning yields another handle onto the
/// same backend.
#[derive(Debug, Clone, Default)]
pub struct MemoryRemote {
    backend: Arc<Backend>,
}

impl MemoryRemote {
    /// Creates an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the contents of `table`.
    pub fn seed(&self, table: &str, rows: Vec<Value>) {
        lock(&self.backend.tables).insert(table.to_string(), rows);
    }

    /// Returns a copy of every row in `table`.
    pub fn rows(&self, table: &str) -> Vec<Value> {
        lock(&self.backend.tables)
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    /// Returns the full call log.
    pub fn calls(&self) -> Vec<CallRecord> {
        lock(&self.backend.calls).clone()
    }

    /// Number of calls of the given kind.
    pub fn call_count(&self, op: RemoteOp) -> usize {
        lock(&self.backend.calls)
            .iter()
            .filter(|c| c.op == op)
            .count()
    }

    /// Highest number of data calls that were executing at the same time.
    pub fn max_concurrent_calls(&self) -> usize {
        self.backend.max_in_flight.load(Ordering::SeqCst)
    }

    /// Fails the next call of kind `op` (or any kind, if `None`) with `error`.
    pub fn fail_next(&self, op: Option<RemoteOp>, error: RemoteError) {
        self.fail_next_n(op, 1, error);
    }

    /// Fails the next `n` matching calls with `error`.
    pub fn fail_next_n(&self, op: Option<RemoteOp>, n: usize, error: RemoteError) {
        let mut faults = lock(&self.backend.one_shot);
        for _ in 0..n {
            faults.push_back(Fault {
                op,
                error: error.clone(),
            });
        }
    }

    /// Fails every matching call until [`heal`](Self::heal) is called.
    pub fn fail_always(&self, op: Option<RemoteOp>, error: RemoteError) {
        lock(&self.backend.sticky).push(Fault { op, error });
    }

    /// Removes all scripted failures.
    pub fn heal(&self) {
        lock(&self.backend.one_shot).clear();
        lock(&self.backend.sticky).clear();
    }

    /// Adds a fixed delay to every call.
    pub fn set_latency(&self, latency: Duration) {
        *lock(&self.backend.latency) = latency;
    }

    fn record(&self, op: RemoteOp, table: &str) -> RemoteResult<()> {
        lock(&self.backend.calls).push(CallRecord {
            op,
            table: table.to_string(),
        });

        {
            let mut one_shot = lock(&self.backend.one_shot);
            if let Some(pos) = one_shot.iter().position(|f| f.applies_to(op)) {
                if let Some(fault) = one_shot.remove(pos) {
                    debug!(?op, table, error = %fault.error, "injected one-shot fault");
                    return Err(fault.error);
                }
            }
        }

        if let Some(fault) = lock(&self.backend.sticky).iter().find(|f| f.applies_to(op)) {
            return Err(fault.error.clone());
        }
        Ok(())
    }

    async fn call<T>(
        &self,
        op: RemoteOp,
        table: &str,
        body: impl FnOnce(&mut HashMap<String, Vec<Value>>) -> RemoteResult<T>,
    ) -> RemoteResult<T> {
        let now = self.backend.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.backend.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let latency = *lock(&self.backend.latency);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let result = self.record(op, table).and_then(|()| {
            let mut tables = lock(&self.backend.tables);
            body(&mut *tables)
        });

        self.backend.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn assign_id(&self) -> RecordId {
        let n = self.backend.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        RecordId::new(format!("srv_{n}"))
    }
}

#[async_trait]
impl RemoteService for MemoryRemote {
    async fn insert(&self, table: &str, mut row: Value) -> RemoteResult<Value> {
        if !row.is_object() {
            return Err(RemoteError::InvalidPayload(format!(
                "insert into {table} expects an object"
            )));
        }
        let needs_id = record_id_of(&row).is_none_or(|id| id.is_temporary());
        if needs_id {
            let id = self.assign_id();
            set_record_id(&mut row, &id);
        }
        self.call(RemoteOp::Insert, table, |tables| {
            tables.entry(table.to_string()).or_default().push(row.clone());
            Ok(row)
        })
        .await
    }

    async fn update(&self, table: &str, filter: &Filter, patch: Value) -> RemoteResult<Vec<Value>> {
        let mut patch = patch;
        if let Some(obj) = patch.as_object_mut() {
            obj.remove(ID_FIELD);
        }
        self.call(RemoteOp::Update, table, |tables| {
            let rows = tables.entry(table.to_string()).or_default();
            let mut updated = Vec::new();
            for row in rows.iter_mut().filter(|r| filter.matches(r)) {
                merge_shallow(row, &patch);
                updated.push(row.clone());
            }
            Ok(updated)
        })
        .await
    }

    async fn delete(&self, table: &str, filter: &Filter) -> RemoteResult<Vec<Value>> {
        self.call(RemoteOp::Delete, table, |tables| {
            let rows = tables.entry(table.to_string()).or_default();
            let (removed, kept): (Vec<Value>, Vec<Value>) =
                rows.drain(..).partition(|r| filter.matches(r));
            *rows = kept;
            Ok(removed)
        })
        .await
    }

    async fn select(&self, table: &str, filter: &Filter) -> RemoteResult<Vec<Value>> {
        self.call(RemoteOp::Select, table, |tables| {
            let rows = tables.get(table).map(Vec::as_slice).unwrap_or_default();
            let matching = rows.iter().filter(|r| filter.matches(r)).cloned();
            Ok(match filter.row_limit() {
                Some(limit) => matching.take(limit).collect(),
                None => matching.collect(),
            })
        })
        .await
    }

    async fn ping(&self) -> RemoteResult<()> {
        self.call(RemoteOp::Ping, "", |_| Ok(())).await
    }
}

/// Connector that hands out handles onto one [`MemoryRemote`] backend.
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    remote: MemoryRemote,
}

impl MemoryConnector {
    /// Creates a connector for `remote`.
    pub fn new(remote: MemoryRemote) -> Self {
        Self { remote }
    }

    /// Returns the shared backend.
    pub fn remote(&self) -> &MemoryRemote {
        &self.remote
    }
}

#[async_trait]
impl RemoteConnector for MemoryConnector {
    async fn connect(&self) -> RemoteResult<Arc<dyn RemoteService>> {
        self.remote.record(RemoteOp::Connect, "")?;
        Ok(Arc::new(self.remote.clone()))
    }
}
