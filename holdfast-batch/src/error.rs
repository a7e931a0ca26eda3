//! Batcher error types.

use holdfast_types::{Classify, ErrorClass};
use thiserror::Error;

/// Result type for a batched request whose work fails with `E`.
pub type BatchResult<T, E> = Result<T, BatchError<E>>;

/// Why a batched request did not produce a value.
#[derive(Debug, Error)]
pub enum BatchError<E> {
    /// The work itself failed (after any retries it was entitled to).
    #[error(transparent)]
    Failed(E),

    /// The request was rejected by `clear()` before it started.
    #[error("request cancelled before it started")]
    Cancelled,

    /// The batcher was shut down before the request started.
    #[error("request batcher is shut down")]
    Shutdown,

    /// The executing task went away without reporting an outcome.
    #[error("request was abandoned before completing")]
    Abandoned,
}

impl<E> BatchError<E> {
    /// Returns the underlying failure, if the work ran and failed.
    pub fn into_inner(self) -> Option<E> {
        match self {
            BatchError::Failed(e) => Some(e),
            _ => None,
        }
    }

    /// Returns a reference to the underlying failure.
    pub fn inner(&self) -> Option<&E> {
        match self {
            BatchError::Failed(e) => Some(e),
            _ => None,
        }
    }

    /// Returns true if the request was cancelled by `clear()`.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, BatchError::Cancelled)
    }
}

impl<E: Classify> Classify for BatchError<E> {
    fn class(&self) -> ErrorClass {
        match self {
            BatchError::Failed(e) => e.class(),
            BatchError::Cancelled | BatchError::Shutdown | BatchError::Abandoned => {
                ErrorClass::Fatal
            }
        }
    }
}
