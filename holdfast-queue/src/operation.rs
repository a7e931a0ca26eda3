//! Queued mutations and the persisted queue record.

use holdfast_types::{EntityKind, EntityRef, RecordId, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// What a queued operation does to its entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SyncAction {
    Add,
    Update,
    Remove,
}

impl SyncAction {
    pub const fn as_str(self) -> &'static str {
        match self {
            SyncAction::Add => "ADD",
            SyncAction::Update => "UPDATE",
            SyncAction::Remove => "REMOVE",
        }
    }
}

impl fmt::Display for SyncAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pending mutation of one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOperation {
    pub op_id: Uuid,
    pub action: SyncAction,
    pub kind: EntityKind,
    pub entity_id: RecordId,
    /// Full row for ADD, patch for UPDATE, `null` for REMOVE.
    #[serde(default)]
    pub payload: Value,
    pub queued_at: Timestamp,
}

impl SyncOperation {
    pub fn new(
        action: SyncAction,
        kind: EntityKind,
        entity_id: impl Into<RecordId>,
        payload: Value,
    ) -> Self {
        Self {
            op_id: Uuid::new_v4(),
            action,
            kind,
            entity_id: entity_id.into(),
            payload,
            queued_at: Timestamp::now(),
        }
    }

    pub fn add(kind: EntityKind, entity_id: impl Into<RecordId>, row: Value) -> Self {
        Self::new(SyncAction::Add, kind, entity_id, row)
    }

    pub fn update(kind: EntityKind, entity_id: impl Into<RecordId>, patch: Value) -> Self {
        Self::new(SyncAction::Update, kind, entity_id, patch)
    }

    pub fn remove(kind: EntityKind, entity_id: impl Into<RecordId>) -> Self {
        Self::new(SyncAction::Remove, kind, entity_id, Value::Null)
    }

    /// Overrides the queue time.
    pub fn queued_at(mut self, at: Timestamp) -> Self {
        self.queued_at = at;
        self
    }

    /// Wire tag such as `ADD_ENTRY`.
    pub fn op_type(&self) -> String {
        format!(
            "{}_{}",
            self.action.as_str(),
            self.kind.as_str().to_ascii_uppercase()
        )
    }

    pub fn entity(&self) -> EntityRef {
        EntityRef::new(self.kind, self.entity_id.clone())
    }

    pub fn targets(&self, kind: EntityKind, id: &RecordId) -> bool {
        self.kind == kind && self.entity_id == *id
    }
}

impl fmt::Display for SyncOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.op_type(), self.entity_id)
    }
}

/// The JSON blob kept in the durable store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct QueueRecord {
    pub queue: Vec<SyncOperation>,
    pub is_syncing: bool,
    pub last_sync_time: Option<Timestamp>,
    pub sync_errors: Vec<String>,
}
