use holdfast_remote::{
    Filter, MemoryConnector, MemoryRemote, RemoteConnector, RemoteError, RemoteOp, RemoteService,
};
use holdfast_types::{Classify, ErrorClass};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::time::Duration;

// ── Error classification ─────────────────────────────────────────

#[test]
fn transient_errors() {
    assert_eq!(RemoteError::Network("reset".into()).class(), ErrorClass::Transient);
    assert_eq!(RemoteError::Timeout.class(), ErrorClass::Transient);
    assert_eq!(RemoteError::http(503, "unavailable").class(), ErrorClass::Transient);
    assert_eq!(RemoteError::http(408, "slow").class(), ErrorClass::Transient);
}

#[test]
fn rate_limit_errors() {
    assert!(RemoteError::http(429, "slow down").is_rate_limited());
    assert!(RemoteError::RateLimited { retry_after_secs: 5 }.is_rate_limited());
    assert!(RemoteError::provider("over_request_rate_limit", "quota").is_rate_limited());
    assert_eq!(
        RemoteError::RateLimited { retry_after_secs: 5 }.retry_after(),
        Some(Duration::from_secs(5))
    );
}

#[test]
fn fatal_errors() {
    assert_eq!(RemoteError::http(400, "bad").class(), ErrorClass::Fatal);
    assert_eq!(RemoteError::http(404, "gone").class(), ErrorClass::Fatal);
    assert_eq!(RemoteError::provider("23505", "duplicate").class(), ErrorClass::Fatal);
    assert!(!RemoteError::InvalidPayload("x".into()).is_retryable());
}

#[test]
fn error_display() {
    assert_eq!(RemoteError::http(500, "boom").to_string(), "HTTP 500: boom");
    assert_eq!(RemoteError::Timeout.to_string(), "request timed out");
}

// ── CRUD ─────────────────────────────────────────────────────────

#[tokio::test]
async fn insert_assigns_server_id_for_temporary_rows() {
    let remote = MemoryRemote::new();
    let row = remote
        .insert("entries", json!({"id": "temp_abc", "notes": "x"}))
        .await
        .unwrap();
    assert_eq!(row["id"], "srv_1");
    assert_eq!(row["notes"], "x");

    let kept = remote
        .insert("entries", json!({"id": "fixed", "notes": "y"}))
        .await
        .unwrap();
    assert_eq!(kept["id"], "fixed");
    assert_eq!(remote.rows("entries").len(), 2);
}

#[tokio::test]
async fn insert_rejects_non_objects() {
    let remote = MemoryRemote::new();
    let err = remote.insert("entries", json!([1, 2])).await.unwrap_err();
    assert!(matches!(err, RemoteError::InvalidPayload(_)));
}

#[tokio::test]
async fn update_merges_and_keeps_id() {
    let remote = MemoryRemote::new();
    remote.seed("goals", vec![json!({"id": "g1", "title": "a", "user_id": "u1"})]);

    let updated = remote
        .update(
            "goals",
            &Filter::by("id", "g1").eq("user_id", "u1"),
            json!({"id": "hijack", "title": "b"}),
        )
        .await
        .unwrap();

    assert_eq!(updated, vec![json!({"id": "g1", "title": "b", "user_id": "u1"})]);
}

#[tokio::test]
async fn delete_and_select() {
    let remote = MemoryRemote::new();
    remote.seed(
        "categories",
        vec![json!({"id": "c1"}), json!({"id": "c2"}), json!({"id": "c3"})],
    );

    let removed = remote
        .delete("categories", &Filter::by("id", "c2"))
        .await
        .unwrap();
    assert_eq!(removed.len(), 1);

    let all = remote.select("categories", &Filter::new()).await.unwrap();
    assert_eq!(all.len(), 2);

    let limited = remote
        .select("categories", &Filter::new().limit(1))
        .await
        .unwrap();
    assert_eq!(limited, vec![json!({"id": "c1"})]);
}

// ── Fault injection ──────────────────────────────────────────────

#[tokio::test]
async fn one_shot_faults_fire_once_per_matching_op() {
    let remote = MemoryRemote::new();
    remote.fail_next(Some(RemoteOp::Insert), RemoteError::Timeout);

    // A select is not affected.
    remote.select("entries", &Filter::new()).await.unwrap();

    let err = remote.insert("entries", json!({})).await.unwrap_err();
    assert_eq!(err, RemoteError::Timeout);
    remote.insert("entries", json!({})).await.unwrap();
}

#[tokio::test]
async fn sticky_faults_until_healed() {
    let remote = MemoryRemote::new();
    remote.fail_always(None, RemoteError::http(503, "down"));

    assert!(remote.ping().await.is_err());
    assert!(remote.select("x", &Filter::new()).await.is_err());

    remote.heal();
    remote.ping().await.unwrap();
}

#[tokio::test]
async fn call_log_records_every_attempt() {
    let remote = MemoryRemote::new();
    remote.fail_next(None, RemoteError::Timeout);
    let _ = remote.select("entries", &Filter::new()).await;
    remote.select("entries", &Filter::new()).await.unwrap();
    assert_eq!(remote.call_count(RemoteOp::Select), 2);
}

#[tokio::test(start_paused = true)]
async fn latency_tracks_concurrency() {
    let remote = MemoryRemote::new();
    remote.set_latency(Duration::from_millis(20));

    let filter_a = Filter::new();
    let filter_b = Filter::new();
    let a = remote.select("t", &filter_a);
    let b = remote.select("t", &filter_b);
    let (ra, rb) = tokio::join!(a, b);
    ra.unwrap();
    rb.unwrap();
    assert_eq!(remote.max_concurrent_calls(), 2);
}

// ── Connector ────────────────────────────────────────────────────

#[tokio::test]
async fn connector_handles_share_backend() {
    let remote = MemoryRemote::new();
    let connector = MemoryConnector::new(remote.clone());

    let h1 = connector.connect().await.unwrap();
    let h2 = connector.connect().await.unwrap();
    h1.insert("entries", json!({"notes": "shared"})).await.unwrap();

    let rows = h2.select("entries", &Filter::new()).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(remote.call_count(RemoteOp::Connect), 2);
}

#[tokio::test]
async fn connector_can_fail() {
    let remote = MemoryRemote::new();
    remote.fail_next(Some(RemoteOp::Connect), RemoteError::Network("refused".into()));
    let connector = MemoryConnector::new(remote);
    assert!(connector.connect().await.is_err());
    assert!(connector.connect().await.is_ok());
}
