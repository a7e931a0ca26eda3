use holdfast_store::{DurableStore, JsonStoreExt, MemoryStore, SqliteStore, StoreError};
use serde::{Deserialize, Serialize};

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct Record {
    name: String,
    count: u32,
}

fn exercise(store: &dyn DurableStore) {
    assert_eq!(store.get_item("missing").unwrap(), None);

    store.set_item("k", "v1").unwrap();
    assert_eq!(store.get_item("k").unwrap().as_deref(), Some("v1"));

    store.set_item("k", "v2").unwrap();
    assert_eq!(store.get_item("k").unwrap().as_deref(), Some("v2"));

    store.remove_item("k").unwrap();
    assert_eq!(store.get_item("k").unwrap(), None);

    // Removing twice is fine.
    store.remove_item("k").unwrap();
}

// ── MemoryStore ─────────────────────────────────────────────────

#[test]
fn memory_store_basic_crud() {
    exercise(&MemoryStore::new());
}

#[test]
fn memory_store_read_only_rejects_writes() {
    let store = MemoryStore::new();
    store.set_item("a", "1").unwrap();
    store.set_read_only(true);

    let err = store.set_item("a", "2").unwrap_err();
    assert!(matches!(err, StoreError::Unavailable(_)));
    assert!(store.remove_item("a").is_err());
    assert_eq!(store.get_item("a").unwrap().as_deref(), Some("1"));

    store.set_read_only(false);
    store.set_item("a", "2").unwrap();
}

#[test]
fn memory_store_keys_sorted() {
    let store = MemoryStore::new();
    store.set_item("b", "").unwrap();
    store.set_item("a", "").unwrap();
    assert_eq!(store.keys(), vec!["a".to_string(), "b".to_string()]);
    assert_eq!(store.len(), 2);
}

// ── SqliteStore ─────────────────────────────────────────────────

#[test]
fn sqlite_store_basic_crud() {
    exercise(&SqliteStore::open_in_memory().unwrap());
}

#[test]
fn sqlite_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("holdfast.db");

    {
        let store = SqliteStore::open(&path).unwrap();
        store.set_item("queue", "[1,2]").unwrap();
    }

    let store = SqliteStore::open(&path).unwrap();
    assert_eq!(store.get_item("queue").unwrap().as_deref(), Some("[1,2]"));
}

#[test]
fn sqlite_store_prefix_listing() {
    let store = SqliteStore::open_in_memory().unwrap();
    store.set_item("cache:a", "1").unwrap();
    store.set_item("cache:b", "2").unwrap();
    store.set_item("queue", "3").unwrap();
    assert_eq!(
        store.keys_with_prefix("cache:").unwrap(),
        vec!["cache:a".to_string(), "cache:b".to_string()]
    );
}

// ── JSON helpers ────────────────────────────────────────────────

#[test]
fn json_roundtrip_through_trait_object() {
    let store: Box<dyn DurableStore> = Box::new(MemoryStore::new());
    let rec = Record {
        name: "x".into(),
        count: 3,
    };
    store.save_json("rec", &rec).unwrap();
    let back: Option<Record> = store.load_json("rec").unwrap();
    assert_eq!(back, Some(rec));
}

#[test]
fn json_decode_error_is_reported() {
    let store = MemoryStore::new();
    store.set_item("rec", "not json").unwrap();
    let err = store.load_json::<Record>("rec").unwrap_err();
    assert!(matches!(err, StoreError::Serialization(_)));
}
