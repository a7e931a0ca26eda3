use holdfast_types::{EntityKind, EntityRef, RecordId, TEMP_ID_PREFIX};
use proptest::prelude::*;
use std::collections::HashSet;
use std::str::FromStr;

// ── RecordId ──────────────────────────────────────────────────────

#[test]
fn temporary_ids_are_unique_and_prefixed() {
    let a = RecordId::temporary();
    let b = RecordId::temporary();
    assert_ne!(a, b);
    assert!(a.as_str().starts_with(TEMP_ID_PREFIX));
    assert!(a.is_temporary());
}

#[test]
fn server_ids_are_not_temporary() {
    let id = RecordId::new("42");
    assert!(!id.is_temporary());
    assert_eq!(id.to_string(), "42");
}

#[test]
fn record_id_serializes_as_plain_string() {
    let id = RecordId::from("abc");
    assert_eq!(serde_json::to_string(&id).unwrap(), "\"abc\"");
    let back: RecordId = serde_json::from_str("\"abc\"").unwrap();
    assert_eq!(back, id);
}

#[test]
fn record_id_hashable() {
    let mut set = HashSet::new();
    set.insert(RecordId::from("a"));
    set.insert(RecordId::from("a"));
    set.insert(RecordId::from("b"));
    assert_eq!(set.len(), 2);
}

// ── EntityKind ────────────────────────────────────────────────────

#[test]
fn kind_tables() {
    assert_eq!(EntityKind::Category.table(), "categories");
    assert_eq!(EntityKind::Goal.table(), "goals");
    assert_eq!(EntityKind::Entry.table(), "entries");
    assert_eq!(EntityKind::from_table("goals"), Some(EntityKind::Goal));
    assert_eq!(EntityKind::from_table("users"), None);
}

#[test]
fn kind_parse_is_case_insensitive() {
    assert_eq!(EntityKind::from_str("ENTRY").unwrap(), EntityKind::Entry);
    assert!(EntityKind::from_str("widget").is_err());
}

#[test]
fn kind_serde_lowercase() {
    assert_eq!(
        serde_json::to_string(&EntityKind::Category).unwrap(),
        "\"category\""
    );
}

// ── EntityRef ─────────────────────────────────────────────────────

#[test]
fn entity_ref_display() {
    let r = EntityRef::new(EntityKind::Entry, "e1");
    assert_eq!(r.to_string(), "entry:e1");
}

#[test]
fn entity_refs_differ_by_kind() {
    let a = EntityRef::new(EntityKind::Entry, "1");
    let b = EntityRef::new(EntityKind::Goal, "1");
    assert_ne!(a, b);
}

// ── Properties ────────────────────────────────────────────────────

fn any_kind() -> impl Strategy<Value = EntityKind> {
    prop::sample::select(EntityKind::ALL.to_vec())
}

proptest! {
    #[test]
    fn temporary_flag_follows_prefix(suffix in "[a-z0-9-]{0,24}") {
        let temp_id = RecordId::new(format!("{TEMP_ID_PREFIX}{suffix}"));
        let server_id = RecordId::new(format!("srv_{suffix}"));
        prop_assert!(temp_id.is_temporary());
        prop_assert!(!server_id.is_temporary());
    }

    #[test]
    fn minted_ids_never_collide(n in 1usize..64) {
        let ids: HashSet<RecordId> = (0..n).map(|_| RecordId::temporary()).collect();
        prop_assert_eq!(ids.len(), n);
        prop_assert!(ids.iter().all(RecordId::is_temporary));
    }

    #[test]
    fn kind_parses_from_its_name_in_any_case(
        kind in any_kind(),
        upper in prop::collection::vec(any::<bool>(), 8),
    ) {
        let name: String = kind
            .as_str()
            .chars()
            .zip(upper.iter().cycle())
            .map(|(c, up)| if *up { c.to_ascii_uppercase() } else { c })
            .collect();
        prop_assert_eq!(name.parse::<EntityKind>().unwrap(), kind);
        prop_assert_eq!(EntityKind::from_table(kind.table()), Some(kind));
    }

    #[test]
    fn entity_ref_display_joins_kind_and_id(kind in any_kind(), id in "[A-Za-z0-9_]{1,16}") {
        let r = EntityRef::new(kind, id.as_str());
        prop_assert_eq!(r.to_string(), format!("{kind}:{id}"));
    }
}
