//! Helpers for the JSON rows exchanged with the remote service.

use crate::RecordId;
use serde_json::Value;

/// Name of the primary-key column on every remote table.
pub const ID_FIELD: &str = "id";

/// Shallow-merges `patch` into `target`.
///
/// Top-level keys of `patch` overwrite those of `target`. A non-object
/// target is replaced by the patch wholesale.
pub fn merge_shallow(target: &mut Value, patch: &Value) {
    match (target.as_object_mut(), patch.as_object()) {
        (Some(dst), Some(src)) => {
            for (k, v) in src {
                dst.insert(k.clone(), v.clone());
            }
        }
        _ => *target = patch.clone(),
    }
}

/// Reads the `id` column of a row. Numeric ids are stringified.
pub fn record_id_of(row: &Value) -> Option<RecordId> {
    match row.get(ID_FIELD)? {
        Value::String(s) => Some(RecordId::new(s.clone())),
        Value::Number(n) => Some(RecordId::new(n.to_string())),
        _ => None,
    }
}

/// Writes the `id` column of an object row.
pub fn set_record_id(row: &mut Value, id: &RecordId) {
    if let Some(obj) = row.as_object_mut() {
        obj.insert(ID_FIELD.to_string(), Value::String(id.as_str().to_string()));
    }
}
