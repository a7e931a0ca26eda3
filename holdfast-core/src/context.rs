//! The sync context: one explicitly constructed owner for every component.

use crate::config::HoldfastConfig;
use crate::error::CoreResult;
use holdfast_batch::{BatcherStats, RequestBatcher};
use holdfast_cache::{CacheKey, CacheStats, QueryCache};
use holdfast_optimistic::{OptimisticManager, OptimisticUpdate};
use holdfast_pool::{ConnectionPool, PoolStatus};
use holdfast_queue::{Collapse, IdMapping, SyncOperation, SyncQueue, SyncStatus, USER_ID_FIELD};
use holdfast_remote::{Filter, RemoteConnector};
use holdfast_store::DurableStore;
use holdfast_types::{Clock, EntityKind, RecordId, SystemClock, lock};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Outcome of [`SyncContext::sync`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    /// True if no pass ran.
    pub skipped: bool,
    pub synced: usize,
    pub failed: usize,
    /// Optimistic updates confirmed by this pass.
    pub confirmed: usize,
    /// Optimistic updates failed by this pass.
    pub rejected: usize,
    /// Cache entries dropped for the resources this pass touched.
    pub invalidated: usize,
    pub id_mappings: Vec<IdMapping>,
    pub errors: Vec<String>,
}

/// Pull-style snapshot of every component.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextStatus {
    pub sync: SyncStatus,
    pub batcher: BatcherStats,
    pub pool: PoolStatus,
    pub cache: CacheStats,
    pub optimistic_pending: usize,
    pub optimistic_tracked: usize,
}

/// Periodic maintenance spawned by [`SyncContext::start_background`].
/// Dropping it stops the tasks.
#[derive(Debug)]
pub struct BackgroundTasks {
    health_check: JoinHandle<()>,
    sweeper: JoinHandle<()>,
}

impl BackgroundTasks {
    pub fn is_running(&self) -> bool {
        !self.health_check.is_finished() || !self.sweeper.is_finished()
    }
}

impl Drop for BackgroundTasks {
    fn drop(&mut self) {
        self.health_check.abort();
        self.sweeper.abort();
    }
}

pub struct SyncContextBuilder {
    store: Arc<dyn DurableStore>,
    connector: Arc<dyn RemoteConnector>,
    config: HoldfastConfig,
    clock: Arc<dyn Clock>,
}

impl SyncContextBuilder {
    pub fn config(mut self, config: HoldfastConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Constructs every component. Must be called inside a Tokio runtime.
    ///
    /// Restores the persisted queue and, when enabled, the cache snapshot.
    pub fn build(self) -> CoreResult<SyncContext> {
        let Self {
            store,
            connector,
            config,
            clock,
        } = self;

        let batcher = RequestBatcher::new(config.batcher.clone());
        let pool = ConnectionPool::new(config.pool.clone(), connector);
        let optimistic = OptimisticManager::with_clock(config.optimistic.clone(), clock.clone());
        let cache = QueryCache::with_clock(config.cache.clone(), clock.clone());
        let queue = SyncQueue::open(
            config.queue.clone(),
            store.clone(),
            batcher.clone(),
            pool.clone(),
            clock,
        )?;

        if let Some(key) = &config.cache_storage_key {
            if let Err(e) = cache.load_from(store.as_ref(), key) {
                warn!(key = %key, error = %e, "cache snapshot unreadable; starting cold");
            }
        }

        info!(
            pending = queue.pending_count(),
            max_connections = config.pool.max_connections,
            "sync context ready"
        );
        Ok(SyncContext {
            config: Arc::new(config),
            store,
            queue,
            optimistic,
            batcher,
            pool,
            cache,
            links: Arc::new(Mutex::new(HashMap::new())),
        })
    }
}

/// Owns the queue, optimistic manager, batcher, pool and cache, and wires
/// them into the mutation and read paths. Cheap to clone.
#[derive(Clone)]
pub struct SyncContext {
    config: Arc<HoldfastConfig>,
    store: Arc<dyn DurableStore>,
    queue: SyncQueue,
    optimistic: OptimisticManager,
    batcher: RequestBatcher,
    pool: ConnectionPool,
    cache: QueryCache,
    /// Queued op id → sequence numbers of the optimistic updates it carries.
    links: Arc<Mutex<HashMap<Uuid, Vec<u64>>>>,
}

impl SyncContext {
    pub fn builder(
        store: Arc<dyn DurableStore>,
        connector: Arc<dyn RemoteConnector>,
    ) -> SyncContextBuilder {
        SyncContextBuilder {
            store,
            connector,
            config: HoldfastConfig::default(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Opens the pool's minimum connections.
    pub async fn initialize(&self) -> CoreResult<()> {
        self.pool.initialize().await?;
        Ok(())
    }

    pub fn config(&self) -> &HoldfastConfig {
        &self.config
    }

    pub fn queue(&self) -> &SyncQueue {
        &self.queue
    }

    pub fn optimistic(&self) -> &OptimisticManager {
        &self.optimistic
    }

    pub fn batcher(&self) -> &RequestBatcher {
        &self.batcher
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    /// Records a new row optimistically and queues its insert.
    ///
    /// The row gets a temporary id unless it carries one, and is stamped
    /// with the actor as owner.
    pub fn create(&self, actor: &str, kind: EntityKind, mut data: Value) -> CoreResult<OptimisticUpdate> {
        if let Some(obj) = data.as_object_mut() {
            obj.entry(USER_ID_FIELD)
                .or_insert_with(|| Value::String(actor.to_string()));
        }
        let update = self.optimistic.create_optimistic_insert(kind.table(), data);
        let op = SyncOperation::add(kind, update.id.clone(), update.data.clone());
        self.enqueue(update, op)
    }

    /// Records a patch optimistically and queues it.
    pub fn update(
        &self,
        actor: &str,
        kind: EntityKind,
        id: &RecordId,
        patch: Value,
    ) -> CoreResult<OptimisticUpdate> {
        let id = self.optimistic.resolve_id(id);
        debug!(actor, kind = %kind, id = %id, "local update");
        let update = self
            .optimistic
            .create_optimistic_update(kind.table(), id.clone(), patch.clone(), None);
        self.enqueue(update, SyncOperation::update(kind, id, patch))
    }

    /// Records a deletion optimistically and queues it.
    pub fn remove(&self, actor: &str, kind: EntityKind, id: &RecordId) -> CoreResult<OptimisticUpdate> {
        let id = self.optimistic.resolve_id(id);
        debug!(actor, kind = %kind, id = %id, "local remove");
        let update = self
            .optimistic
            .create_optimistic_delete(kind.table(), id.clone(), None);
        self.enqueue(update, SyncOperation::remove(kind, id))
    }

    fn enqueue(&self, update: OptimisticUpdate, op: SyncOperation) -> CoreResult<OptimisticUpdate> {
        let op_id = op.op_id;
        // Held across the enqueue so a pass never sees the op unlinked.
        let mut links = lock(&self.links);
        let outcome = match self.queue.enqueue(op) {
            Ok(outcome) => outcome,
            Err(e) => {
                drop(links);
                self.optimistic.fail_seqs(&update.id, &[update.seq], e.to_string());
                return Err(e.into());
            }
        };

        match outcome {
            Collapse::Appended => {
                links.insert(op_id, vec![update.seq]);
            }
            Collapse::MergedIntoAdd(target) => {
                links.entry(target).or_default().push(update.seq);
            }
            Collapse::Replaced(superseded) => {
                let mut seqs: Vec<u64> = superseded
                    .iter()
                    .filter_map(|id| links.remove(id))
                    .flatten()
                    .collect();
                seqs.push(update.seq);
                links.insert(op_id, seqs);
            }
            Collapse::Cancelled(dropped) => {
                let mut seqs: Vec<u64> = dropped
                    .iter()
                    .filter_map(|id| links.remove(id))
                    .flatten()
                    .collect();
                seqs.push(update.seq);
                drop(links);
                // Cancelled before it was ever sent.
                let settled = self.optimistic.confirm_seqs(&update.id, &seqs, None);
                debug!(
                    id = %update.id,
                    dropped = dropped.len(),
                    settled,
                    "local insert cancelled before sync"
                );
            }
        }
        Ok(update)
    }

    fn take_linked(&self, op_id: &Uuid) -> Vec<u64> {
        lock(&self.links).remove(op_id).unwrap_or_default()
    }

    /// Replays the queue for `actor` and reconciles the outcome.
    ///
    /// Each successful operation confirms the optimistic updates it
    /// carried (remapping temporary ids), each failed one fails them, and
    /// the actor's cached queries for every touched resource are dropped.
    /// Updates still waiting on a later operation stay pending.
    pub async fn sync(&self, actor: &str) -> CoreResult<SyncReport> {
        let pass = self.queue.process(actor).await?;
        if pass.skipped {
            return Ok(SyncReport {
                skipped: true,
                ..SyncReport::default()
            });
        }

        let mut report = SyncReport {
            synced: pass.succeeded.len(),
            failed: pass.failed.len(),
            id_mappings: pass.id_mappings.clone(),
            ..SyncReport::default()
        };
        let mut touched = BTreeSet::new();

        for success in &pass.succeeded {
            let op = &success.operation;
            let seqs = self.take_linked(&op.op_id);
            report.confirmed += self
                .optimistic
                .confirm_seqs(&op.entity_id, &seqs, success.response.as_ref());
            touched.insert(op.kind);
        }
        for failure in &pass.failed {
            let op = &failure.operation;
            let seqs = self.take_linked(&op.op_id);
            report.rejected += self
                .optimistic
                .fail_seqs(&op.entity_id, &seqs, failure.error.clone());
            report.errors.push(format!("{op}: {}", failure.error));
            touched.insert(op.kind);
        }
        self.prune_links();
        for kind in touched {
            report.invalidated += self.cache.clear_resource_for_user(kind.table(), actor);
        }

        info!(
            actor,
            synced = report.synced,
            failed = report.failed,
            confirmed = report.confirmed,
            invalidated = report.invalidated,
            "sync reconciled"
        );
        Ok(report)
    }

    /// Drops links whose operation left the queue without an outcome.
    fn prune_links(&self) {
        let mut links = lock(&self.links);
        let queued: HashSet<Uuid> = self.queue.pending_operations().iter().map(|op| op.op_id).collect();
        links.retain(|op_id, _| queued.contains(op_id));
    }

    /// Reads `kind` rows for `actor` through the cache, then projects the
    /// actor's outstanding optimistic updates over them.
    pub async fn read(&self, actor: &str, kind: EntityKind, filter: Filter) -> CoreResult<Vec<Value>> {
        let table = kind.table();
        let scoped = filter.eq(USER_ID_FIELD, actor);

        let mut key = CacheKey::new(table);
        for (name, value) in scoped.params() {
            key = key.param(name, value);
        }
        let key = key.user(actor).build()?;

        let query = scoped.clone();
        let rows: Vec<Value> = self
            .cache
            .fetch_through(&self.pool, &key, None, move |conn| async move {
                conn.select(table, &query).await
            })
            .await?;

        let mut projected = self.optimistic.apply_updates(table, rows);
        projected.retain(|row| scoped.matches(row));
        if let Some(limit) = scoped.row_limit() {
            projected.truncate(limit);
        }
        Ok(projected)
    }

    /// Spawns the pool health check and the optimistic sweep.
    pub fn start_background(&self) -> BackgroundTasks {
        BackgroundTasks {
            health_check: self.pool.start_health_check(),
            sweeper: self.optimistic.start_sweeper(),
        }
    }

    pub fn status(&self) -> ContextStatus {
        ContextStatus {
            sync: self.queue.sync_status(),
            batcher: self.batcher.stats(),
            pool: self.pool.status(),
            cache: self.cache.stats(),
            optimistic_pending: self.optimistic.pending_count(),
            optimistic_tracked: self.optimistic.len(),
        }
    }

    /// Stops the batcher and pool and writes the cache snapshot.
    ///
    /// Queued operations stay persisted for the next session.
    pub fn shutdown(&self) -> CoreResult<()> {
        self.batcher.shutdown();
        self.pool.shutdown();
        if let Some(key) = &self.config.cache_storage_key {
            let saved = self.cache.save_to(self.store.as_ref(), key)?;
            debug!(key = %key, saved, "cache snapshot written");
        }
        info!(pending = self.queue.pending_count(), "sync context shut down");
        Ok(())
    }
}

impl fmt::Debug for SyncContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncContext")
            .field("queue", &self.queue)
            .field("pool", &self.pool.status())
            .finish()
    }
}

