//! The durable operation queue and its replay loop.

use crate::collapse::{Collapse, collapse};
use crate::config::QueueConfig;
use crate::dispatch::send;
use crate::error::{QueueError, QueueResult};
use crate::operation::{QueueRecord, SyncAction, SyncOperation};
use futures::future::join_all;
use holdfast_batch::{BatchError, RequestBatcher, RequestOptions};
use holdfast_pool::{ConnectionPool, PoolError};
use holdfast_store::{DurableStore, JsonStoreExt};
use holdfast_types::json::{record_id_of, set_record_id};
use holdfast_types::{Classify, Clock, EntityKind, EntityRef, ErrorClass, RecordId, Timestamp, lock};
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Pull-style view of the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub pending_count: usize,
    pub is_syncing: bool,
    pub last_sync_time: Option<Timestamp>,
    pub errors: Vec<String>,
}

/// A temporary id the server replaced with a real one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IdMapping {
    pub kind: EntityKind,
    pub temporary: RecordId,
    pub real: RecordId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OperationSuccess {
    pub operation: SyncOperation,
    /// Row returned by the server (inserted or updated), if any.
    pub response: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OperationFailure {
    pub operation: SyncOperation,
    pub error: String,
    pub class: ErrorClass,
}

/// Outcome of one `process` pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessReport {
    /// True if the pass did not run (already syncing, or nothing queued).
    pub skipped: bool,
    pub succeeded: Vec<OperationSuccess>,
    pub failed: Vec<OperationFailure>,
    pub id_mappings: Vec<IdMapping>,
}

impl ProcessReport {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Default)]
struct QueueState {
    ops: Vec<SyncOperation>,
    in_flight: HashSet<Uuid>,
    last_sync_time: Option<Timestamp>,
    sync_errors: Vec<String>,
}

struct QueueInner {
    config: QueueConfig,
    store: Arc<dyn DurableStore>,
    batcher: RequestBatcher,
    pool: ConnectionPool,
    clock: Arc<dyn Clock>,
    state: Mutex<QueueState>,
    is_syncing: AtomicBool,
}

/// Durable FIFO of pending mutations, collapsed per entity and replayed
/// through the batcher on pooled connections. Cheap to clone.
#[derive(Clone)]
pub struct SyncQueue {
    inner: Arc<QueueInner>,
}

/// Clears the syncing flag and in-flight set when a pass ends or is dropped.
struct PassGuard<'a> {
    inner: &'a QueueInner,
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        lock(&self.inner.state).in_flight.clear();
        self.inner.is_syncing.store(false, Ordering::SeqCst);
    }
}

type Dispatched = Result<Option<Value>, BatchError<PoolError>>;

impl SyncQueue {
    /// Opens the queue, restoring any record persisted under the configured
    /// key. A record left with `isSyncing = true` by an interrupted pass is
    /// reset.
    pub fn open(
        config: QueueConfig,
        store: Arc<dyn DurableStore>,
        batcher: RequestBatcher,
        pool: ConnectionPool,
        clock: Arc<dyn Clock>,
    ) -> QueueResult<Self> {
        let record: QueueRecord = store.load_json(&config.storage_key)?.unwrap_or_default();
        let interrupted = record.is_syncing;

        let queue = Self {
            inner: Arc::new(QueueInner {
                config,
                store,
                batcher,
                pool,
                clock,
                state: Mutex::new(QueueState {
                    ops: record.queue,
                    in_flight: HashSet::new(),
                    last_sync_time: record.last_sync_time,
                    sync_errors: record.sync_errors,
                }),
                is_syncing: AtomicBool::new(false),
            }),
        };

        let pending = queue.pending_count();
        if interrupted {
            warn!(pending, "previous sync pass was interrupted; resetting syncing flag");
            queue.persist(&lock(&queue.inner.state))?;
        }
        info!(pending, key = %queue.inner.config.storage_key, "operation queue loaded");
        Ok(queue)
    }

    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    /// Adds `op` after applying the collapsing rules, then persists.
    pub fn enqueue(&self, op: SyncOperation) -> QueueResult<Collapse> {
        if op.action != SyncAction::Remove && !op.payload.is_object() {
            return Err(QueueError::InvalidPayload {
                op_type: op.op_type(),
                id: op.entity_id.to_string(),
            });
        }

        let label = op.to_string();
        let mut state = lock(&self.inner.state);
        let outcome = {
            let QueueState { ops, in_flight, .. } = &mut *state;
            collapse(ops, in_flight, op)
        };
        self.persist(&state)?;
        let pending = state.ops.len();
        drop(state);

        debug!(op = %label, ?outcome, pending, "operation enqueued");
        Ok(outcome)
    }

    /// Replays the queue.
    ///
    /// Returns a skipped report if a pass is already running or nothing is
    /// queued. Operations on the same entity run in FIFO order; different
    /// entities run concurrently. Every operation leaves the queue once it
    /// has an outcome: successes are removed, failures are removed and
    /// recorded in the sync errors.
    pub async fn process(&self, actor: &str) -> QueueResult<ProcessReport> {
        if lock(&self.inner.state).ops.is_empty() {
            return Ok(ProcessReport::skipped());
        }
        if self
            .inner
            .is_syncing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("sync pass already running");
            return Ok(ProcessReport::skipped());
        }
        let _guard = PassGuard { inner: &self.inner };

        let chains = {
            let mut state = lock(&self.inner.state);
            let snapshot = state.ops.clone();
            state.in_flight.extend(snapshot.iter().map(|op| op.op_id));
            self.persist(&state)?;
            chains_by_entity(snapshot)
        };
        let total: usize = chains.iter().map(Vec::len).sum();
        info!(actor, operations = total, entities = chains.len(), "sync pass started");

        let results = join_all(chains.into_iter().map(|chain| self.run_chain(actor, chain))).await;

        let mut report = ProcessReport::default();
        for chain in results {
            report.succeeded.extend(chain.succeeded);
            report.failed.extend(chain.failed);
            report.id_mappings.extend(chain.id_mappings);
        }

        {
            let mut state = lock(&self.inner.state);
            state.in_flight.clear();
            state.last_sync_time = Some(self.inner.clock.now());
            if report.failed.is_empty() {
                state.sync_errors.clear();
            }
            self.inner.is_syncing.store(false, Ordering::SeqCst);
            self.persist(&state)?;
        }

        info!(
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            remapped = report.id_mappings.len(),
            "sync pass finished"
        );
        Ok(report)
    }

    async fn run_chain(&self, actor: &str, chain: Vec<Uuid>) -> ProcessReport {
        let mut report = ProcessReport::default();
        for op_id in chain {
            // Re-read: an earlier ADD in this chain may have remapped the id.
            let Some(op) = self.find(op_id) else {
                debug!(%op_id, "operation left the queue before dispatch");
                continue;
            };

            let result = self.dispatch(actor, op.clone()).await;
            match result {
                Ok(response) => {
                    let mapping = self.complete(&op, response.as_ref());
                    debug!(op = %op, "operation synced");
                    report.id_mappings.extend(mapping);
                    report.succeeded.push(OperationSuccess {
                        operation: op,
                        response,
                    });
                }
                Err(e) => {
                    let failure = OperationFailure {
                        error: e.to_string(),
                        class: e.class(),
                        operation: op,
                    };
                    self.record_failure(&failure);
                    report.failed.push(failure);
                }
            }
        }
        report
    }

    async fn dispatch(&self, actor: &str, op: SyncOperation) -> Dispatched {
        let pool = self.inner.pool.clone();
        let actor = actor.to_string();
        let options = RequestOptions::new(self.inner.config.priority).category(op.kind.table());
        self.inner
            .batcher
            .add(
                move || {
                    let pool = pool.clone();
                    let op = op.clone();
                    let actor = actor.clone();
                    async move { pool.with_connection(move |conn| send(conn, op, actor)).await }
                },
                options,
            )
            .await
    }

    /// Removes a synced operation and, for an ADD whose id the server
    /// replaced, rewrites the remaining operations for that entity.
    fn complete(&self, op: &SyncOperation, response: Option<&Value>) -> Option<IdMapping> {
        let mut state = lock(&self.inner.state);
        state.ops.retain(|queued| queued.op_id != op.op_id);
        state.in_flight.remove(&op.op_id);

        let mapping = match (op.action, response.and_then(record_id_of)) {
            (SyncAction::Add, Some(real)) if real != op.entity_id => {
                for queued in state.ops.iter_mut().filter(|q| q.targets(op.kind, &op.entity_id)) {
                    queued.entity_id = real.clone();
                    if queued.payload.get("id").is_some() {
                        set_record_id(&mut queued.payload, &real);
                    }
                }
                Some(IdMapping {
                    kind: op.kind,
                    temporary: op.entity_id.clone(),
                    real,
                })
            }
            _ => None,
        };

        if let Err(e) = self.persist(&state) {
            error!(op = %op, error = %e, "failed to persist queue after sync");
        }
        if let Some(m) = &mapping {
            debug!(kind = %m.kind, temporary = %m.temporary, real = %m.real, "remapped queued operations");
        }
        mapping
    }

    fn record_failure(&self, failure: &OperationFailure) {
        let op = &failure.operation;
        warn!(op = %op, class = %failure.class, error = %failure.error, "operation failed; dropped from queue");

        let mut state = lock(&self.inner.state);
        state.ops.retain(|queued| queued.op_id != op.op_id);
        state.in_flight.remove(&op.op_id);
        state.sync_errors.push(format!("{op}: {}", failure.error));
        if let Err(e) = self.persist(&state) {
            error!(op = %op, error = %e, "failed to persist queue after failure");
        }
    }

    fn find(&self, op_id: Uuid) -> Option<SyncOperation> {
        lock(&self.inner.state)
            .ops
            .iter()
            .find(|op| op.op_id == op_id)
            .cloned()
    }

    fn persist(&self, state: &QueueState) -> QueueResult<()> {
        let record = QueueRecord {
            queue: state.ops.clone(),
            is_syncing: self.inner.is_syncing.load(Ordering::SeqCst),
            last_sync_time: state.last_sync_time,
            sync_errors: state.sync_errors.clone(),
        };
        self.inner.store.save_json(&self.inner.config.storage_key, &record)?;
        Ok(())
    }

    pub fn sync_status(&self) -> SyncStatus {
        let state = lock(&self.inner.state);
        SyncStatus {
            pending_count: state.ops.len(),
            is_syncing: self.inner.is_syncing.load(Ordering::SeqCst),
            last_sync_time: state.last_sync_time,
            errors: state.sync_errors.clone(),
        }
    }

    pub fn pending_operations(&self) -> Vec<SyncOperation> {
        lock(&self.inner.state).ops.clone()
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.inner.state).ops.len()
    }

    pub fn is_syncing(&self) -> bool {
        self.inner.is_syncing.load(Ordering::SeqCst)
    }

    /// Drops every queued operation that is not in flight. Returns how many
    /// were dropped.
    pub fn clear(&self) -> QueueResult<usize> {
        let mut state = lock(&self.inner.state);
        let before = state.ops.len();
        let QueueState { ops, in_flight, .. } = &mut *state;
        ops.retain(|op| in_flight.contains(&op.op_id));
        let dropped = before - state.ops.len();
        self.persist(&state)?;
        info!(dropped, "operation queue cleared");
        Ok(dropped)
    }

    pub fn clear_sync_errors(&self) -> QueueResult<()> {
        let mut state = lock(&self.inner.state);
        state.sync_errors.clear();
        self.persist(&state)
    }
}

/// Groups operations into per-entity chains, keeping FIFO order within each
/// chain and ordering chains by their first operation.
fn chains_by_entity(ops: Vec<SyncOperation>) -> Vec<Vec<Uuid>> {
    let mut index: HashMap<EntityRef, usize> = HashMap::new();
    let mut chains: Vec<Vec<Uuid>> = Vec::new();
    for op in ops {
        let slot = *index.entry(op.entity()).or_insert_with(|| {
            chains.push(Vec::new());
            chains.len() - 1
        });
        chains[slot].push(op.op_id);
    }
    chains
}

impl fmt::Debug for SyncQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncQueue")
            .field("config", &self.inner.config)
            .field("status", &self.sync_status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn chains_keep_fifo_per_entity() {
        let a1 = SyncOperation::add(EntityKind::Entry, "a", json!({}));
        let b1 = SyncOperation::update(EntityKind::Entry, "b", json!({}));
        let a2 = SyncOperation::remove(EntityKind::Entry, "a");
        let other_kind = SyncOperation::update(EntityKind::Goal, "a", json!({}));
        let ids = [a1.op_id, b1.op_id, a2.op_id, other_kind.op_id];

        let chains = chains_by_entity(vec![a1, b1, a2, other_kind]);
        assert_eq!(chains, vec![vec![ids[0], ids[2]], vec![ids[1]], vec![ids[3]]]);
    }
}
