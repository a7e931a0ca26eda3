//! The optimistic update manager.

use crate::alias::AliasTable;
use crate::config::OptimisticConfig;
use crate::update::{OptimisticOp, OptimisticUpdate, UpdateStatus};
use holdfast_types::json::{merge_shallow, record_id_of, set_record_id};
use holdfast_types::{Clock, ListenerId, Observers, RecordId, SystemClock, Timestamp, lock};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Error text recorded on updates failed by the pending timeout.
pub const PENDING_TIMEOUT_ERROR: &str = "timed out waiting for server confirmation";

/// Notifications delivered synchronously to listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum OptimisticEvent {
    Created(OptimisticUpdate),
    Confirmed {
        id: RecordId,
        real_id: RecordId,
        count: usize,
    },
    Failed {
        id: RecordId,
        error: String,
        count: usize,
    },
    Swept(SweepReport),
}

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub purged_confirmed: usize,
    pub purged_failed: usize,
    pub timed_out: usize,
}

#[derive(Default)]
struct ManagerState {
    updates: BTreeMap<u64, OptimisticUpdate>,
    aliases: AliasTable,
    next_seq: u64,
}

impl ManagerState {
    /// Pending updates for `key`, restricted to `only` when given.
    fn matching_pending(&self, key: &RecordId, only: Option<&[u64]>) -> Vec<u64> {
        self.updates
            .iter()
            .filter(|(seq, u)| {
                u.is_pending()
                    && only.is_none_or(|seqs| seqs.contains(*seq))
                    && self.aliases.resolve(&u.id) == *key
            })
            .map(|(seq, _)| *seq)
            .collect()
    }
}

struct ManagerInner {
    config: OptimisticConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<ManagerState>,
    events: Observers<OptimisticEvent>,
}

/// Owns every optimistic update and projects them over server snapshots.
/// Cheap to clone.
#[derive(Clone)]
pub struct OptimisticManager {
    inner: Arc<ManagerInner>,
}

impl OptimisticManager {
    pub fn new(config: OptimisticConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: OptimisticConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                config: config.normalized(),
                clock,
                state: Mutex::new(ManagerState::default()),
                events: Observers::new("optimistic-manager"),
            }),
        }
    }

    pub fn config(&self) -> &OptimisticConfig {
        &self.inner.config
    }

    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&OptimisticEvent) + Send + Sync + 'static,
    {
        self.inner.events.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.inner.events.unsubscribe(id)
    }

    /// Records an insert. Uses `data.id` when present, otherwise assigns a
    /// temporary id and writes it into the data.
    pub fn create_optimistic_insert(&self, table: &str, mut data: Value) -> OptimisticUpdate {
        let id = record_id_of(&data).unwrap_or_else(RecordId::temporary);
        set_record_id(&mut data, &id);
        self.create(table, id, OptimisticOp::Insert, data, None)
    }

    pub fn create_optimistic_update(
        &self,
        table: &str,
        id: RecordId,
        data: Value,
        original_data: Option<Value>,
    ) -> OptimisticUpdate {
        self.create(table, id, OptimisticOp::Update, data, original_data)
    }

    pub fn create_optimistic_delete(
        &self,
        table: &str,
        id: RecordId,
        original_data: Option<Value>,
    ) -> OptimisticUpdate {
        self.create(table, id, OptimisticOp::Delete, Value::Null, original_data)
    }

    pub fn create_optimistic_upsert(&self, table: &str, id: RecordId, data: Value) -> OptimisticUpdate {
        self.create(table, id, OptimisticOp::Upsert, data, None)
    }

    /// Registers an update built elsewhere, keeping its timestamp.
    pub fn track(&self, mut update: OptimisticUpdate) -> OptimisticUpdate {
        {
            let mut state = lock(&self.inner.state);
            state.next_seq += 1;
            update.seq = state.next_seq;
            state.updates.insert(update.seq, update.clone());
        }
        debug!(
            id = %update.id,
            table = %update.table,
            op = %update.operation,
            "optimistic update recorded"
        );
        self.inner.events.emit(&OptimisticEvent::Created(update.clone()));
        update
    }

    fn create(
        &self,
        table: &str,
        id: RecordId,
        operation: OptimisticOp,
        data: Value,
        original_data: Option<Value>,
    ) -> OptimisticUpdate {
        let update = OptimisticUpdate::new(table, id, operation, data, self.inner.clock.now())
            .with_original(original_data);
        self.track(update)
    }

    /// Confirms every pending update for the record `id` names.
    ///
    /// When `real_data` carries an id different from the current one, the
    /// alias is recorded and all updates for the record are re-indexed under
    /// the real id. Returns how many updates were confirmed.
    pub fn confirm_update(&self, id: &RecordId, real_data: Option<&Value>) -> usize {
        self.confirm(id, None, real_data)
    }

    /// Like [`confirm_update`](Self::confirm_update), but settles only the
    /// pending updates whose sequence numbers are in `seqs`. The alias for a
    /// new server id is still recorded for the whole record.
    pub fn confirm_seqs(&self, id: &RecordId, seqs: &[u64], real_data: Option<&Value>) -> usize {
        self.confirm(id, Some(seqs), real_data)
    }

    fn confirm(&self, id: &RecordId, only: Option<&[u64]>, real_data: Option<&Value>) -> usize {
        let (count, real_id) = {
            let mut state = lock(&self.inner.state);
            let key = state.aliases.resolve(id);
            let pending = state.matching_pending(&key, only);
            let real_id = real_data.and_then(record_id_of).unwrap_or_else(|| key.clone());

            if real_id != key {
                state.aliases.insert(key.clone(), real_id.clone());
                let ManagerState { updates, aliases, .. } = &mut *state;
                for update in updates.values_mut() {
                    if aliases.resolve(&update.id) == real_id {
                        update.id = real_id.clone();
                        if update.data.is_object() {
                            set_record_id(&mut update.data, &real_id);
                        }
                    }
                }
            }

            for seq in &pending {
                if let Some(update) = state.updates.get_mut(seq) {
                    update.status = UpdateStatus::Confirmed;
                    if let (OptimisticOp::Insert | OptimisticOp::Upsert, Some(real)) =
                        (update.operation, real_data)
                    {
                        merge_shallow(&mut update.data, real);
                    }
                }
            }
            (pending.len(), real_id)
        };

        if count == 0 {
            debug!(%id, "no pending optimistic updates to confirm");
        } else {
            debug!(%id, %real_id, count, "optimistic updates confirmed");
        }
        self.inner.events.emit(&OptimisticEvent::Confirmed {
            id: id.clone(),
            real_id,
            count,
        });
        count
    }

    /// Fails every pending update for the record, keeping `error` for display.
    pub fn fail_update(&self, id: &RecordId, error: impl Into<String>) -> usize {
        self.fail(id, None, error.into())
    }

    /// Fails only the pending updates of the record whose sequence numbers
    /// are in `seqs`.
    pub fn fail_seqs(&self, id: &RecordId, seqs: &[u64], error: impl Into<String>) -> usize {
        self.fail(id, Some(seqs), error.into())
    }

    fn fail(&self, id: &RecordId, only: Option<&[u64]>, error: String) -> usize {
        let count = {
            let mut state = lock(&self.inner.state);
            let key = state.aliases.resolve(id);
            let pending = state.matching_pending(&key, only);
            for seq in &pending {
                if let Some(update) = state.updates.get_mut(seq) {
                    update.status = UpdateStatus::Failed;
                    update.error = Some(error.clone());
                }
            }
            pending.len()
        };

        warn!(%id, count, %error, "optimistic update failed");
        self.inner.events.emit(&OptimisticEvent::Failed {
            id: id.clone(),
            error,
            count,
        });
        count
    }

    /// Projects every non-failed update for `table` over `base`.
    ///
    /// Updates replay in ascending `(timestamp, seq)` order regardless of the
    /// order they were recorded in. Row ids resolve through the alias table
    /// before comparison.
    pub fn apply_updates(&self, table: &str, base: Vec<Value>) -> Vec<Value> {
        let state = lock(&self.inner.state);
        let mut updates: Vec<&OptimisticUpdate> = state
            .updates
            .values()
            .filter(|u| u.table == table && u.status != UpdateStatus::Failed)
            .collect();
        updates.sort_by_key(|u| u.order_key());

        let aliases = &state.aliases;
        let mut rows = base;
        for update in updates {
            let key = aliases.resolve(&update.id);
            let position = rows
                .iter()
                .position(|row| record_id_of(row).is_some_and(|rid| aliases.resolve(&rid) == key));

            match (update.operation, position) {
                (OptimisticOp::Insert | OptimisticOp::Upsert, Some(i))
                | (OptimisticOp::Update, Some(i)) => {
                    merge_shallow(&mut rows[i], &update.data);
                    set_record_id(&mut rows[i], &key);
                }
                (OptimisticOp::Insert | OptimisticOp::Upsert, None) => {
                    let mut row = update.data.clone();
                    set_record_id(&mut row, &key);
                    rows.push(row);
                }
                (OptimisticOp::Delete, Some(i)) => {
                    rows.remove(i);
                }
                (OptimisticOp::Update | OptimisticOp::Delete, None) => {}
            }
        }
        rows
    }

    /// Runs one sweep at the clock's current time.
    pub fn sweep(&self) -> SweepReport {
        self.sweep_at(self.inner.clock.now())
    }

    /// Fails pending updates past the pending timeout and purges settled
    /// updates past their retention.
    pub fn sweep_at(&self, now: Timestamp) -> SweepReport {
        let config = &self.inner.config;
        let mut report = SweepReport::default();
        let mut timed_out = Vec::new();
        {
            let mut state = lock(&self.inner.state);
            state.updates.retain(|_, update| {
                let age = now.since(update.timestamp);
                match update.status {
                    UpdateStatus::Pending if age > config.pending_timeout => {
                        update.status = UpdateStatus::Failed;
                        update.error = Some(PENDING_TIMEOUT_ERROR.to_string());
                        timed_out.push(update.id.clone());
                        true
                    }
                    UpdateStatus::Confirmed if age > config.confirmed_retention => {
                        report.purged_confirmed += 1;
                        false
                    }
                    UpdateStatus::Failed if age > config.failed_retention => {
                        report.purged_failed += 1;
                        false
                    }
                    _ => true,
                }
            });

            let ManagerState { updates, aliases, .. } = &mut *state;
            aliases.retain(|real| updates.values().any(|u| u.id == *real));
        }
        report.timed_out = timed_out.len();

        timed_out.dedup();
        for id in timed_out {
            self.inner.events.emit(&OptimisticEvent::Failed {
                id,
                error: PENDING_TIMEOUT_ERROR.to_string(),
                count: 1,
            });
        }

        if report != SweepReport::default() {
            info!(
                purged_confirmed = report.purged_confirmed,
                purged_failed = report.purged_failed,
                timed_out = report.timed_out,
                "optimistic sweep"
            );
            self.inner.events.emit(&OptimisticEvent::Swept(report));
        }
        report
    }

    /// Spawns the periodic sweep.
    pub fn start_sweeper(&self) -> JoinHandle<()> {
        let manager = self.clone();
        let period = self.inner.config.sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                manager.sweep();
            }
        })
    }

    /// Returns the canonical id for `id`.
    pub fn resolve_id(&self, id: &RecordId) -> RecordId {
        lock(&self.inner.state).aliases.resolve(id)
    }

    /// Every update for the record `id` names, oldest first.
    pub fn get(&self, id: &RecordId) -> Vec<OptimisticUpdate> {
        let state = lock(&self.inner.state);
        let key = state.aliases.resolve(id);
        let mut found: Vec<OptimisticUpdate> = state
            .updates
            .values()
            .filter(|u| state.aliases.resolve(&u.id) == key)
            .cloned()
            .collect();
        found.sort_by_key(OptimisticUpdate::order_key);
        found
    }

    /// Every update for `table`, in replay order.
    pub fn updates_for(&self, table: &str) -> Vec<OptimisticUpdate> {
        let state = lock(&self.inner.state);
        let mut found: Vec<OptimisticUpdate> = state
            .updates
            .values()
            .filter(|u| u.table == table)
            .cloned()
            .collect();
        found.sort_by_key(OptimisticUpdate::order_key);
        found
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.inner.state)
            .updates
            .values()
            .filter(|u| u.is_pending())
            .count()
    }

    pub fn len(&self) -> usize {
        lock(&self.inner.state).updates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for OptimisticManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OptimisticManager")
            .field("config", &self.inner.config)
            .field("updates", &self.len())
            .finish()
    }
}
