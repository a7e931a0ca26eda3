//! Pool error types.

use holdfast_remote::RemoteError;
use holdfast_types::{Classify, ErrorClass};
use std::time::Duration;
use thiserror::Error;

/// Result type for pool operations.
pub type PoolResult<T> = Result<T, PoolError>;

/// Errors that can occur while using the pool.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    /// Every connection stayed busy for the whole acquire timeout.
    #[error("pool exhausted: no connection available after {}ms", waited.as_millis())]
    AcquireTimeout { waited: Duration },

    /// Opening a new connection failed.
    #[error("failed to open connection: {0}")]
    Connect(RemoteError),

    /// The call made on a pooled connection failed.
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// The pool has been shut down.
    #[error("connection pool is closed")]
    Closed,
}

impl PoolError {
    /// Returns true if this is pool exhaustion rather than a remote rejection.
    pub fn is_exhausted(&self) -> bool {
        matches!(self, PoolError::AcquireTimeout { .. })
    }

    /// Returns the remote error, if the failure came from the backend.
    pub fn remote(&self) -> Option<&RemoteError> {
        match self {
            PoolError::Connect(e) | PoolError::Remote(e) => Some(e),
            _ => None,
        }
    }
}

impl Classify for PoolError {
    fn class(&self) -> ErrorClass {
        match self {
            PoolError::AcquireTimeout { .. } => ErrorClass::Transient,
            PoolError::Connect(e) | PoolError::Remote(e) => e.class(),
            PoolError::Closed => ErrorClass::Fatal,
        }
    }
}
