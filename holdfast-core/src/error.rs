//! Error types for the sync context.

use holdfast_cache::CacheError;
use holdfast_pool::PoolError;
use holdfast_queue::QueueError;
use holdfast_store::StoreError;
use holdfast_types::{Classify, ErrorClass};
use std::path::PathBuf;
use thiserror::Error;

/// Result type for context operations.
pub type CoreResult<T> = Result<T, CoreError>;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("failed to read config file {}: {source}", path.display())]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl CoreError {
    /// Returns true if the failure was pool exhaustion.
    pub fn is_pool_exhausted(&self) -> bool {
        match self {
            CoreError::Pool(e) | CoreError::Cache(CacheError::Fetch(e)) => e.is_exhausted(),
            _ => false,
        }
    }
}

impl Classify for CoreError {
    fn class(&self) -> ErrorClass {
        match self {
            CoreError::Pool(e) => e.class(),
            CoreError::Cache(e) => e.class(),
            _ => ErrorClass::Fatal,
        }
    }
}
