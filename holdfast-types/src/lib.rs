//! Core type definitions for the Holdfast sync core.
//!
//! This crate defines the vocabulary shared by every component:
//! - Record identifiers (server ids and `temp_` placeholders)
//! - Entity kinds and `(kind, id)` entity references
//! - Millisecond timestamps and injectable clocks
//! - The error taxonomy used to decide retry and rate-limit behaviour
//! - A panic-isolating observer registry for push-style events
//! - JSON row helpers and a millisecond `Duration` serde adapter

mod class;
pub mod duration_ms;
mod ids;
pub mod json;
mod observer;
mod timestamp;

pub use class::{Classify, ErrorClass};
pub use ids::{EntityKind, EntityRef, RecordId, TEMP_ID_PREFIX};
pub use observer::{ListenerId, Observers};
pub use timestamp::{Clock, ManualClock, SystemClock, Timestamp};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("unknown entity kind: {0}")]
    UnknownKind(String),
}

/// Locks a mutex, recovering the guard if a previous holder panicked.
///
/// Critical sections in this workspace never leave shared state half-written
/// across a panic, so the poisoned value is still consistent.
pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
