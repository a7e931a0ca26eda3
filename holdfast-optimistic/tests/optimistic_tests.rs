use holdfast_optimistic::{
    OptimisticConfig, OptimisticEvent, OptimisticManager, OptimisticOp, OptimisticUpdate,
    PENDING_TIMEOUT_ERROR, UpdateStatus,
};
use holdfast_types::{ManualClock, RecordId, Timestamp};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const T0: u64 = 1_700_000_000_000;

fn manager() -> (OptimisticManager, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(Timestamp::from_millis(T0)));
    let manager = OptimisticManager::with_clock(OptimisticConfig::default(), clock.clone());
    (manager, clock)
}

fn id(s: &str) -> RecordId {
    RecordId::new(s)
}

fn at(table: &str, record: &str, op: OptimisticOp, data: Value, t: u64) -> OptimisticUpdate {
    OptimisticUpdate::new(table, id(record), op, data, Timestamp::from_millis(t))
}

// ── Creation ─────────────────────────────────────────────────────

#[test]
fn insert_assigns_temporary_id_and_notifies() {
    let (manager, _) = manager();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    manager.subscribe(move |e| sink.lock().unwrap().push(e.clone()));

    let update = manager.create_optimistic_insert("entries", json!({"notes": "hi"}));
    assert!(update.id.is_temporary());
    assert_eq!(update.data["id"], update.id.as_str());
    assert_eq!(update.status, UpdateStatus::Pending);
    assert_eq!(update.timestamp, Timestamp::from_millis(T0));

    let seen = seen.lock().unwrap();
    assert_eq!(*seen, vec![OptimisticEvent::Created(update)]);
}

#[test]
fn insert_keeps_caller_id() {
    let (manager, _) = manager();
    let update = manager.create_optimistic_insert("goals", json!({"id": "g7", "title": "x"}));
    assert_eq!(update.id, id("g7"));
}

#[test]
fn update_and_delete_keep_original_data() {
    let (manager, _) = manager();
    let original = json!({"id": "e1", "notes": "old"});
    let update = manager.create_optimistic_update(
        "entries",
        id("e1"),
        json!({"notes": "new"}),
        Some(original.clone()),
    );
    assert_eq!(update.operation, OptimisticOp::Update);
    assert_eq!(update.original_data, Some(original.clone()));

    let delete = manager.create_optimistic_delete("entries", id("e1"), Some(original));
    assert_eq!(delete.operation, OptimisticOp::Delete);
    assert_eq!(manager.pending_count(), 2);
    assert_eq!(manager.get(&id("e1")).len(), 2);
}

// ── Confirmation ─────────────────────────────────────────────────

#[test]
fn confirm_remaps_temporary_id() {
    let (manager, _) = manager();
    let insert = manager.create_optimistic_insert("entries", json!({"notes": "a"}));
    let temp = insert.id.clone();
    manager.create_optimistic_update("entries", temp.clone(), json!({"notes": "b"}), None);

    let confirmed = manager.confirm_update(&temp, Some(&json!({"id": "srv_9", "notes": "a"})));
    assert_eq!(confirmed, 2);
    assert_eq!(manager.resolve_id(&temp), id("srv_9"));
    assert_eq!(manager.pending_count(), 0);

    // Both ids reach the same record.
    let by_temp = manager.get(&temp);
    let by_real = manager.get(&id("srv_9"));
    assert_eq!(by_temp, by_real);
    assert!(by_real.iter().all(|u| u.id == id("srv_9")));
    assert!(by_real.iter().all(|u| u.status == UpdateStatus::Confirmed));
}

#[test]
fn updates_made_with_stale_temp_id_still_match() {
    let (manager, _) = manager();
    let insert = manager.create_optimistic_insert("entries", json!({"notes": "a"}));
    manager.confirm_update(&insert.id, Some(&json!({"id": "srv_1"})));

    // A caller still holding the temporary id edits the record.
    manager.create_optimistic_update("entries", insert.id.clone(), json!({"notes": "z"}), None);
    let rows = manager.apply_updates("entries", vec![json!({"id": "srv_1", "notes": "a"})]);
    assert_eq!(rows, vec![json!({"id": "srv_1", "notes": "z"})]);
}

#[test]
fn fail_keeps_error_and_drops_from_projection() {
    let (manager, _) = manager();
    let insert = manager.create_optimistic_insert("goals", json!({"title": "x"}));
    assert_eq!(manager.fail_update(&insert.id, "HTTP 400: bad title"), 1);

    let stored = manager.get(&insert.id);
    assert_eq!(stored[0].status, UpdateStatus::Failed);
    assert_eq!(stored[0].error.as_deref(), Some("HTTP 400: bad title"));
    assert!(manager.apply_updates("goals", Vec::new()).is_empty());
}

#[test]
fn settling_by_seq_leaves_later_updates_pending() {
    let (manager, _) = manager();
    let insert = manager.create_optimistic_insert("entries", json!({"notes": "a"}));
    let delete = manager.create_optimistic_delete("entries", insert.id.clone(), None);

    let confirmed = manager.confirm_seqs(&insert.id, &[insert.seq], Some(&json!({"id": "srv_4"})));
    assert_eq!(confirmed, 1);
    assert_eq!(manager.resolve_id(&insert.id), id("srv_4"));
    assert_eq!(manager.pending_count(), 1);

    // The delete is still open and can be rejected on its own.
    assert_eq!(manager.fail_seqs(&id("srv_4"), &[delete.seq], "HTTP 403: forbidden"), 1);
    let rows = manager.apply_updates("entries", vec![json!({"id": "srv_4", "notes": "a"})]);
    assert_eq!(rows, vec![json!({"id": "srv_4", "notes": "a"})]);
}

// ── Projection ───────────────────────────────────────────────────

#[test]
fn later_update_wins_regardless_of_tracking_order() {
    let (manager, _) = manager();
    manager.track(at("entries", "e1", OptimisticOp::Update, json!({"x": 2}), T0 + 2));
    manager.track(at("entries", "e1", OptimisticOp::Update, json!({"x": 1}), T0 + 1));

    let rows = manager.apply_updates("entries", vec![json!({"id": "e1", "x": 0})]);
    assert_eq!(rows, vec![json!({"id": "e1", "x": 2})]);
}

#[test]
fn update_then_delete_nets_to_absent() {
    let (manager, _) = manager();
    manager.track(at("entries", "e1", OptimisticOp::Delete, Value::Null, T0 + 2));
    manager.track(at("entries", "e1", OptimisticOp::Update, json!({"x": 1}), T0 + 1));

    let rows = manager.apply_updates("entries", vec![json!({"id": "e1"}), json!({"id": "e2"})]);
    assert_eq!(rows, vec![json!({"id": "e2"})]);
}

#[test]
fn delete_then_upsert_nets_to_present() {
    let (manager, _) = manager();
    manager.track(at("entries", "e1", OptimisticOp::Upsert, json!({"x": 9}), T0 + 2));
    manager.track(at("entries", "e1", OptimisticOp::Delete, Value::Null, T0 + 1));

    let rows = manager.apply_updates("entries", vec![json!({"id": "e1", "x": 1})]);
    assert_eq!(rows, vec![json!({"id": "e1", "x": 9})]);
}

#[test]
fn insert_already_in_snapshot_is_not_duplicated() {
    let (manager, _) = manager();
    let insert = manager.create_optimistic_insert("goals", json!({"title": "Run"}));
    manager.confirm_update(&insert.id, Some(&json!({"id": "g1", "title": "Run"})));

    let rows = manager.apply_updates("goals", vec![json!({"id": "g1", "title": "Run"})]);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["id"], "g1");
}

#[test]
fn projection_is_scoped_to_table() {
    let (manager, _) = manager();
    manager.create_optimistic_insert("goals", json!({"title": "g"}));
    manager.create_optimistic_insert("entries", json!({"notes": "e"}));

    assert_eq!(manager.apply_updates("goals", Vec::new()).len(), 1);
    assert_eq!(manager.updates_for("categories").len(), 0);
}

#[test]
fn update_for_missing_row_is_ignored() {
    let (manager, _) = manager();
    manager.create_optimistic_update("entries", id("ghost"), json!({"x": 1}), None);
    assert!(manager.apply_updates("entries", Vec::new()).is_empty());
}

// ── Sweep ────────────────────────────────────────────────────────

#[test]
fn sweep_times_out_stale_pending() {
    let (manager, clock) = manager();
    let update = manager.create_optimistic_insert("entries", json!({}));

    clock.advance(Duration::from_secs(29));
    assert_eq!(manager.sweep().timed_out, 0);

    clock.advance(Duration::from_secs(2));
    let report = manager.sweep();
    assert_eq!(report.timed_out, 1);
    let stored = manager.get(&update.id);
    assert_eq!(stored[0].status, UpdateStatus::Failed);
    assert_eq!(stored[0].error.as_deref(), Some(PENDING_TIMEOUT_ERROR));
}

#[test]
fn sweep_purges_settled_by_age() {
    let (manager, _) = manager();
    let confirmed = manager.create_optimistic_insert("entries", json!({"id": "c"}));
    let failed = manager.create_optimistic_insert("entries", json!({"id": "f"}));
    manager.confirm_update(&confirmed.id, None);
    manager.fail_update(&failed.id, "nope");

    let at_six_minutes = Timestamp::from_millis(T0).plus(Duration::from_secs(6 * 60));
    let report = manager.sweep_at(at_six_minutes);
    assert_eq!(report.purged_confirmed, 1);
    assert_eq!(report.purged_failed, 0);
    assert_eq!(manager.len(), 1);

    let at_eleven_minutes = Timestamp::from_millis(T0).plus(Duration::from_secs(11 * 60));
    assert_eq!(manager.sweep_at(at_eleven_minutes).purged_failed, 1);
    assert!(manager.is_empty());
}

#[test]
fn sweep_prunes_orphaned_aliases() {
    let (manager, clock) = manager();
    let insert = manager.create_optimistic_insert("entries", json!({}));
    manager.confirm_update(&insert.id, Some(&json!({"id": "srv_1"})));
    assert_eq!(manager.resolve_id(&insert.id), id("srv_1"));

    clock.advance(Duration::from_secs(6 * 60));
    manager.sweep();
    assert_eq!(manager.resolve_id(&insert.id), insert.id);
}

#[tokio::test(start_paused = true)]
async fn background_sweeper_runs_on_interval() {
    let clock = Arc::new(ManualClock::new(Timestamp::from_millis(T0)));
    let config = OptimisticConfig::default().with_sweep_interval(Duration::from_secs(60));
    let manager = OptimisticManager::with_clock(config, clock.clone());
    manager.create_optimistic_insert("entries", json!({}));
    clock.advance(Duration::from_secs(45));

    let handle = manager.start_sweeper();
    tokio::time::sleep(Duration::from_secs(61)).await;
    assert_eq!(manager.pending_count(), 0);
    handle.abort();
}

#[tokio::test(start_paused = true)]
async fn zero_sweep_interval_from_json_keeps_running() {
    let config: OptimisticConfig = serde_json::from_str(r#"{"sweepInterval": 0}"#).unwrap();
    let manager = OptimisticManager::new(config);

    let handle = manager.start_sweeper();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!handle.is_finished());
    handle.abort();
}

// ── Ordering property ────────────────────────────────────────────

proptest! {
    #[test]
    fn replay_order_follows_timestamps(order in (1usize..12).prop_flat_map(|n| {
        Just((0..n as u64).collect::<Vec<_>>()).prop_shuffle()
    })) {
        let (manager, _) = manager();
        for t in &order {
            manager.track(at("entries", "e1", OptimisticOp::Update, json!({"x": t}), T0 + t));
        }
        let rows = manager.apply_updates("entries", vec![json!({"id": "e1", "x": -1})]);
        let newest = order.len() as u64 - 1;
        prop_assert_eq!(rows, vec![json!({"id": "e1", "x": newest})]);
    }
}
