//! Queue configuration.

use holdfast_batch::Priority;
use serde::{Deserialize, Serialize};

/// Storage key of the persisted queue record.
pub const DEFAULT_STORAGE_KEY: &str = "holdfast.sync_queue";

/// Configuration for the operation queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct QueueConfig {
    /// Durable-store key the queue record is written under.
    pub storage_key: String,
    /// Batcher priority used when replaying operations.
    pub priority: Priority,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
            priority: Priority::Medium,
        }
    }
}

impl QueueConfig {
    pub fn with_storage_key(mut self, key: impl Into<String>) -> Self {
        self.storage_key = key.into();
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}
