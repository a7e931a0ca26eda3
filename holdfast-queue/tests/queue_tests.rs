use holdfast_batch::{BatcherConfig, RequestBatcher};
use holdfast_pool::{ConnectionPool, PoolConfig};
use holdfast_queue::{
    Collapse, DEFAULT_STORAGE_KEY, QueueConfig, QueueError, QueueRecord, SyncAction,
    SyncOperation, SyncQueue, collapse,
};
use holdfast_remote::{MemoryConnector, MemoryRemote, RemoteError, RemoteOp};
use holdfast_store::{JsonStoreExt, MemoryStore};
use holdfast_types::{EntityKind, ErrorClass, ManualClock, RecordId, Timestamp};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

const T0: u64 = 1_700_000_000_000;

struct Harness {
    queue: SyncQueue,
    batcher: RequestBatcher,
    remote: MemoryRemote,
    store: Arc<MemoryStore>,
}

fn harness_on(store: Arc<MemoryStore>, remote: MemoryRemote) -> Harness {
    let connector = Arc::new(MemoryConnector::new(remote.clone()));
    let pool = ConnectionPool::new(PoolConfig::default().with_bounds(0, 4), connector);
    let batcher =
        RequestBatcher::new(BatcherConfig::default().with_retry(2, Duration::from_millis(10)));
    let clock = Arc::new(ManualClock::new(Timestamp::from_millis(T0)));
    let queue = SyncQueue::open(
        QueueConfig::default(),
        store.clone(),
        batcher.clone(),
        pool,
        clock,
    )
    .unwrap();
    Harness {
        queue,
        batcher,
        remote,
        store,
    }
}

fn harness() -> Harness {
    harness_on(Arc::new(MemoryStore::new()), MemoryRemote::new())
}

fn persisted(store: &MemoryStore) -> QueueRecord {
    store.load_json(DEFAULT_STORAGE_KEY).unwrap().unwrap()
}

async fn wait_until_syncing(queue: &SyncQueue) {
    while !queue.is_syncing() {
        tokio::task::yield_now().await;
    }
}

// ── Collapsing ───────────────────────────────────────────────────

#[tokio::test]
async fn add_then_remove_leaves_nothing() {
    let h = harness();
    let temp = RecordId::temporary();
    let add = SyncOperation::add(EntityKind::Entry, temp.clone(), json!({"id": temp.as_str()}));
    let add_id = add.op_id;
    h.queue.enqueue(add).unwrap();
    let outcome = h
        .queue
        .enqueue(SyncOperation::remove(EntityKind::Entry, temp.clone()))
        .unwrap();

    assert_eq!(outcome, Collapse::Cancelled(vec![add_id]));
    assert_eq!(h.queue.pending_count(), 0);
    assert!(persisted(&h.store).queue.is_empty());
}

#[tokio::test]
async fn payload_must_be_an_object() {
    let h = harness();
    let err = h
        .queue
        .enqueue(SyncOperation::update(EntityKind::Goal, "g1", json!("nope")))
        .unwrap_err();
    assert!(matches!(err, QueueError::InvalidPayload { .. }));
    assert_eq!(h.queue.pending_count(), 0);
}

proptest! {
    #[test]
    fn repeated_updates_keep_only_the_last(values in prop::collection::vec(any::<i64>(), 1..20)) {
        let mut queue = Vec::new();
        let mut last = None;
        for v in &values {
            let op = SyncOperation::update(EntityKind::Entry, "e1", json!({"x": v}));
            last = Some(op.clone());
            collapse(&mut queue, &HashSet::new(), op);
        }
        prop_assert_eq!(queue.len(), 1);
        prop_assert_eq!(Some(&queue[0]), last.as_ref());
    }

    #[test]
    fn at_most_one_update_or_remove_per_entity(steps in prop::collection::vec((0u8..4, any::<bool>()), 1..40)) {
        let mut queue = Vec::new();
        let mut last: HashMap<String, SyncOperation> = HashMap::new();
        for (entity, is_remove) in steps {
            let id = format!("e{entity}");
            let op = if is_remove {
                SyncOperation::remove(EntityKind::Entry, id.clone())
            } else {
                SyncOperation::update(EntityKind::Entry, id.clone(), json!({"n": entity}))
            };
            last.insert(id, op.clone());
            collapse(&mut queue, &HashSet::new(), op);
        }
        prop_assert_eq!(queue.len(), last.len());
        for op in &queue {
            prop_assert_eq!(Some(op), last.get(op.entity_id.as_str()));
        }
    }
}

// ── Processing ───────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn add_then_update_syncs_as_one_insert() {
    let h = harness();
    let temp = RecordId::temporary();
    h.queue
        .enqueue(SyncOperation::add(
            EntityKind::Entry,
            temp.clone(),
            json!({"id": temp.as_str(), "notes": ""}),
        ))
        .unwrap();
    h.queue
        .enqueue(SyncOperation::update(EntityKind::Entry, temp.clone(), json!({"notes": "x"})))
        .unwrap();

    let pending = h.queue.pending_operations();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].action, SyncAction::Add);
    assert_eq!(pending[0].payload["notes"], "x");

    let report = h.queue.process("u1").await.unwrap();
    assert!(report.is_clean());
    assert_eq!(report.succeeded.len(), 1);
    assert_eq!(report.id_mappings.len(), 1);
    assert_eq!(report.id_mappings[0].temporary, temp);
    assert_eq!(report.id_mappings[0].real, RecordId::new("srv_1"));

    let status = h.queue.sync_status();
    assert_eq!(status.pending_count, 0);
    assert!(!status.is_syncing);
    assert_eq!(status.last_sync_time, Some(Timestamp::from_millis(T0)));

    assert_eq!(
        h.remote.rows("entries"),
        vec![json!({"id": "srv_1", "notes": "x", "user_id": "u1"})]
    );
    assert_eq!(h.remote.call_count(RemoteOp::Insert), 1);
    assert_eq!(h.remote.call_count(RemoteOp::Update), 0);

    let record = persisted(&h.store);
    assert!(record.queue.is_empty());
    assert!(!record.is_syncing);
    assert_eq!(record.last_sync_time, Some(Timestamp::from_millis(T0)));
}

#[tokio::test(start_paused = true)]
async fn update_and_remove_are_scoped_to_actor() {
    let remote = MemoryRemote::new();
    remote.seed(
        "goals",
        vec![
            json!({"id": "g1", "user_id": "u1", "title": "mine"}),
            json!({"id": "g1", "user_id": "u2", "title": "theirs"}),
        ],
    );
    remote.seed("categories", vec![json!({"id": "c1", "user_id": "u1"})]);
    let h = harness_on(Arc::new(MemoryStore::new()), remote);

    h.queue
        .enqueue(SyncOperation::update(EntityKind::Goal, "g1", json!({"id": "g1", "title": "new"})))
        .unwrap();
    h.queue.enqueue(SyncOperation::remove(EntityKind::Category, "c1")).unwrap();
    let report = h.queue.process("u1").await.unwrap();

    assert_eq!(report.succeeded.len(), 2);
    let goals = h.remote.rows("goals");
    assert_eq!(goals[0]["title"], "new");
    assert_eq!(goals[1]["title"], "theirs");
    assert!(h.remote.rows("categories").is_empty());
}

#[tokio::test(start_paused = true)]
async fn partial_failure_does_not_halt_the_pass() {
    let remote = MemoryRemote::new();
    remote.seed("goals", vec![json!({"id": "g1", "user_id": "u1"})]);
    remote.seed("categories", vec![json!({"id": "c1", "user_id": "u1"})]);
    let h = harness_on(Arc::new(MemoryStore::new()), remote);

    h.queue
        .enqueue(SyncOperation::add(EntityKind::Entry, "e1", json!({"id": "e1"})))
        .unwrap();
    h.queue
        .enqueue(SyncOperation::update(EntityKind::Goal, "g1", json!({"title": ""})))
        .unwrap();
    h.queue.enqueue(SyncOperation::remove(EntityKind::Category, "c1")).unwrap();
    h.remote
        .fail_next(Some(RemoteOp::Update), RemoteError::http(400, "title required"));

    let report = h.queue.process("u1").await.unwrap();
    assert_eq!(report.succeeded.len(), 2);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].operation.entity_id.as_str(), "g1");
    assert_eq!(report.failed[0].class, ErrorClass::Fatal);

    // The failure is recorded, not resurrected.
    let status = h.queue.sync_status();
    assert_eq!(status.pending_count, 0);
    assert_eq!(status.errors.len(), 1);
    assert!(status.errors[0].starts_with("UPDATE_GOAL g1"));
    assert_eq!(persisted(&h.store).sync_errors, status.errors);

    // Errors survive a skipped pass and clear after a clean one.
    assert!(h.queue.process("u1").await.unwrap().skipped);
    assert_eq!(h.queue.sync_status().errors.len(), 1);
    h.queue
        .enqueue(SyncOperation::add(EntityKind::Entry, "e2", json!({"id": "e2"})))
        .unwrap();
    assert!(h.queue.process("u1").await.unwrap().is_clean());
    assert!(h.queue.sync_status().errors.is_empty());
}

#[tokio::test(start_paused = true)]
async fn transient_failure_is_retried_by_batcher() {
    let h = harness();
    h.remote.fail_next(Some(RemoteOp::Insert), RemoteError::Timeout);
    h.queue
        .enqueue(SyncOperation::add(EntityKind::Entry, "e1", json!({"id": "e1"})))
        .unwrap();

    let report = h.queue.process("u1").await.unwrap();
    assert!(report.is_clean());
    assert_eq!(h.remote.call_count(RemoteOp::Insert), 2);
    assert_eq!(h.remote.rows("entries").len(), 1);
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_are_recorded() {
    let h = harness();
    h.remote.fail_always(Some(RemoteOp::Insert), RemoteError::http(503, "down"));
    h.queue
        .enqueue(SyncOperation::add(EntityKind::Entry, "e1", json!({"id": "e1"})))
        .unwrap();

    let report = h.queue.process("u1").await.unwrap();
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].class, ErrorClass::Transient);
    assert_eq!(h.remote.call_count(RemoteOp::Insert), 3);
    assert_eq!(h.queue.pending_count(), 0);
}

#[tokio::test]
async fn empty_queue_is_a_no_op() {
    let h = harness();
    let report = h.queue.process("u1").await.unwrap();
    assert!(report.skipped);
    assert_eq!(h.queue.sync_status().last_sync_time, None);
}

#[tokio::test(start_paused = true)]
async fn concurrent_process_is_skipped() {
    let h = harness();
    h.queue
        .enqueue(SyncOperation::add(EntityKind::Entry, "e1", json!({"id": "e1"})))
        .unwrap();
    h.batcher.pause();

    let first = {
        let queue = h.queue.clone();
        tokio::spawn(async move { queue.process("u1").await })
    };
    wait_until_syncing(&h.queue).await;
    assert!(persisted(&h.store).is_syncing);

    let second = h.queue.process("u1").await.unwrap();
    assert!(second.skipped);

    h.batcher.resume();
    let first = first.await.unwrap().unwrap();
    assert_eq!(first.succeeded.len(), 1);
    assert!(!h.queue.is_syncing());
}

// ── Id remapping ─────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn operations_queued_during_insert_follow_the_real_id() {
    let h = harness();
    let temp = RecordId::temporary();
    h.queue
        .enqueue(SyncOperation::add(EntityKind::Entry, temp.clone(), json!({"notes": "a"})))
        .unwrap();
    h.batcher.pause();

    let pass = {
        let queue = h.queue.clone();
        tokio::spawn(async move { queue.process("u1").await })
    };
    wait_until_syncing(&h.queue).await;

    // The ADD is in flight, so this is queued rather than merged.
    let outcome = h
        .queue
        .enqueue(SyncOperation::update(EntityKind::Entry, temp.clone(), json!({"notes": "b"})))
        .unwrap();
    assert_eq!(outcome, Collapse::Appended);

    h.batcher.resume();
    let report = pass.await.unwrap().unwrap();
    assert_eq!(report.id_mappings.len(), 1);

    let pending = h.queue.pending_operations();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].entity_id, RecordId::new("srv_1"));

    h.queue.process("u1").await.unwrap();
    assert_eq!(h.remote.rows("entries")[0]["notes"], "b");
}

#[tokio::test(start_paused = true)]
async fn remove_after_sent_add_is_still_sent() {
    let h = harness();
    let temp = RecordId::temporary();
    h.queue
        .enqueue(SyncOperation::add(EntityKind::Entry, temp.clone(), json!({})))
        .unwrap();
    h.batcher.pause();

    let pass = {
        let queue = h.queue.clone();
        tokio::spawn(async move { queue.process("u1").await })
    };
    wait_until_syncing(&h.queue).await;
    h.queue.enqueue(SyncOperation::remove(EntityKind::Entry, temp)).unwrap();
    h.batcher.resume();
    pass.await.unwrap().unwrap();

    assert_eq!(h.remote.rows("entries").len(), 1);
    let report = h.queue.process("u1").await.unwrap();
    assert_eq!(report.succeeded[0].operation.action, SyncAction::Remove);
    assert!(h.remote.rows("entries").is_empty());
}

// ── Persistence ──────────────────────────────────────────────────

#[tokio::test]
async fn queue_survives_restart() {
    let store = Arc::new(MemoryStore::new());
    {
        let h = harness_on(store.clone(), MemoryRemote::new());
        h.queue
            .enqueue(SyncOperation::update(EntityKind::Goal, "g1", json!({"title": "a"})))
            .unwrap();
        h.queue.enqueue(SyncOperation::remove(EntityKind::Entry, "e9")).unwrap();
    }

    let reopened = harness_on(store, MemoryRemote::new());
    let pending = reopened.queue.pending_operations();
    assert_eq!(pending.len(), 2);
    assert_eq!(pending[0].op_type(), "UPDATE_GOAL");
    assert_eq!(pending[1].op_type(), "REMOVE_ENTRY");
}

#[tokio::test]
async fn interrupted_pass_is_reset_on_load() {
    let store = Arc::new(MemoryStore::new());
    let record = QueueRecord {
        queue: vec![SyncOperation::remove(EntityKind::Entry, "e1")],
        is_syncing: true,
        last_sync_time: None,
        sync_errors: vec!["earlier".into()],
    };
    store.save_json(DEFAULT_STORAGE_KEY, &record).unwrap();

    let h = harness_on(store, MemoryRemote::new());
    let status = h.queue.sync_status();
    assert!(!status.is_syncing);
    assert_eq!(status.pending_count, 1);
    assert_eq!(status.errors, vec!["earlier".to_string()]);
    assert!(!persisted(&h.store).is_syncing);
}

#[tokio::test]
async fn clear_and_clear_errors_persist() {
    let store = Arc::new(MemoryStore::new());
    let record = QueueRecord {
        queue: vec![
            SyncOperation::remove(EntityKind::Entry, "e1"),
            SyncOperation::remove(EntityKind::Entry, "e2"),
        ],
        sync_errors: vec!["old".into()],
        ..QueueRecord::default()
    };
    store.save_json(DEFAULT_STORAGE_KEY, &record).unwrap();
    let h = harness_on(store, MemoryRemote::new());

    assert_eq!(h.queue.clear().unwrap(), 2);
    h.queue.clear_sync_errors().unwrap();

    let saved = persisted(&h.store);
    assert!(saved.queue.is_empty());
    assert!(saved.sync_errors.is_empty());
}

#[tokio::test]
async fn persisted_record_shape() {
    let h = harness();
    h.queue
        .enqueue(SyncOperation::add(EntityKind::Entry, "e1", json!({"id": "e1"})))
        .unwrap();

    let raw: Value = h.store.load_json(DEFAULT_STORAGE_KEY).unwrap().unwrap();
    assert_eq!(raw["isSyncing"], false);
    assert_eq!(raw["lastSyncTime"], Value::Null);
    assert_eq!(raw["syncErrors"], json!([]));
    assert_eq!(raw["queue"][0]["action"], "ADD");
    assert_eq!(raw["queue"][0]["kind"], "entry");
}
