//! Cache error types.

use holdfast_pool::PoolError;
use holdfast_store::StoreError;
use holdfast_types::{Classify, ErrorClass};
use thiserror::Error;

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

#[derive(Debug, Error)]
pub enum CacheError {
    /// Every key is scoped to a user.
    #[error("cache key for route `{route}` has no user scope")]
    MissingUserScope { route: String },

    /// A value could not be converted to or from its cached JSON form.
    #[error("cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// The read-through fetch failed.
    #[error(transparent)]
    Fetch(#[from] PoolError),
}

impl Classify for CacheError {
    fn class(&self) -> ErrorClass {
        match self {
            CacheError::Fetch(e) => e.class(),
            _ => ErrorClass::Fatal,
        }
    }
}
