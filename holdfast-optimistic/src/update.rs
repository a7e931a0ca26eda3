//! Optimistic update records.

use holdfast_types::{RecordId, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// The local mutation an update stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimisticOp {
    Insert,
    Update,
    Delete,
    Upsert,
}

impl fmt::Display for OptimisticOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OptimisticOp::Insert => "insert",
            OptimisticOp::Update => "update",
            OptimisticOp::Delete => "delete",
            OptimisticOp::Upsert => "upsert",
        };
        f.write_str(name)
    }
}

/// Lifecycle state. `Pending` moves to exactly one of the other two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateStatus {
    Pending,
    Confirmed,
    Failed,
}

/// A locally applied change that the server has not yet confirmed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimisticUpdate {
    /// Tie-breaker among updates sharing a timestamp; assigned on tracking.
    pub seq: u64,
    /// Record id. Temporary until confirmation remaps it.
    pub id: RecordId,
    pub table: String,
    pub operation: OptimisticOp,
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_data: Option<Value>,
    pub timestamp: Timestamp,
    pub status: UpdateStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OptimisticUpdate {
    /// Builds a pending update. `seq` is assigned when the manager tracks it.
    pub fn new(
        table: impl Into<String>,
        id: RecordId,
        operation: OptimisticOp,
        data: Value,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            seq: 0,
            id,
            table: table.into(),
            operation,
            data,
            original_data: None,
            timestamp,
            status: UpdateStatus::Pending,
            error: None,
        }
    }

    pub fn with_original(mut self, original: Option<Value>) -> Self {
        self.original_data = original;
        self
    }

    pub fn is_pending(&self) -> bool {
        self.status == UpdateStatus::Pending
    }

    /// Replay order: timestamp, then tracking sequence.
    pub fn order_key(&self) -> (Timestamp, u64) {
        (self.timestamp, self.seq)
    }
}
