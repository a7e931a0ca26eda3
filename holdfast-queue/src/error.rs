//! Queue error types.

use holdfast_store::StoreError;
use thiserror::Error;

/// Result type for queue operations.
pub type QueueResult<T> = Result<T, QueueError>;

/// Errors raised by the queue itself, as opposed to per-operation failures,
/// which are reported in [`ProcessReport`](crate::ProcessReport).
#[derive(Debug, Error)]
pub enum QueueError {
    /// Reading or writing the persisted queue record failed.
    #[error("queue persistence failed: {0}")]
    Store(#[from] StoreError),

    /// An operation payload was not a JSON object.
    #[error("invalid payload for {op_type} {id}: expected a JSON object")]
    InvalidPayload { op_type: String, id: String },
}
