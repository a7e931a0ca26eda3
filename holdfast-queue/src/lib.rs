//! Durable operation queue for the Holdfast sync core.
//!
//! Mutations made while offline (or faster than the network can absorb)
//! are appended to a FIFO that is persisted to a [`DurableStore`] after
//! every change. Redundant entries collapse per entity as they arrive, so
//! the queue holds at most one UPDATE or REMOVE for any entity and an ADD
//! that is removed before it was ever sent vanishes entirely.
//!
//! [`SyncQueue::process`] replays the queue through the request batcher on
//! pooled connections. Each operation leaves the persisted queue as soon as
//! it has an outcome, so a crash mid-pass leaves exactly the operations that
//! had not finished.
//!
//! [`DurableStore`]: holdfast_store::DurableStore

mod collapse;
mod config;
mod dispatch;
mod error;
mod operation;
mod queue;

pub use collapse::{Collapse, collapse};
pub use config::{DEFAULT_STORAGE_KEY, QueueConfig};
pub use dispatch::USER_ID_FIELD;
pub use error::{QueueError, QueueResult};
pub use operation::{QueueRecord, SyncAction, SyncOperation};
pub use queue::{
    IdMapping, OperationFailure, OperationSuccess, ProcessReport, SyncQueue, SyncStatus,
};
