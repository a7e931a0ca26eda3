//! Aggregate configuration for a sync context.

use crate::error::{CoreError, CoreResult};
use holdfast_batch::BatcherConfig;
use holdfast_cache::CacheConfig;
use holdfast_optimistic::OptimisticConfig;
use holdfast_pool::PoolConfig;
use holdfast_queue::QueueConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Storage key of the persisted query-cache snapshot.
pub const DEFAULT_CACHE_STORAGE_KEY: &str = "holdfast.query_cache";

/// Every component's configuration in one document.
///
/// Missing sections and fields take their defaults, so `{}` is a valid
/// configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HoldfastConfig {
    pub queue: QueueConfig,
    pub optimistic: OptimisticConfig,
    pub batcher: BatcherConfig,
    pub pool: PoolConfig,
    pub cache: CacheConfig,
    /// Durable-store key for the cache snapshot. `None` disables it.
    pub cache_storage_key: Option<String>,
}

impl Default for HoldfastConfig {
    fn default() -> Self {
        Self {
            queue: QueueConfig::default(),
            optimistic: OptimisticConfig::default(),
            batcher: BatcherConfig::default(),
            pool: PoolConfig::default(),
            cache: CacheConfig::default(),
            cache_storage_key: Some(DEFAULT_CACHE_STORAGE_KEY.to_string()),
        }
    }
}

impl HoldfastConfig {
    pub fn from_json_str(json: &str) -> CoreResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> CoreResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| CoreError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_json_str(&contents)?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    pub fn to_json_pretty(&self) -> CoreResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn with_queue(mut self, queue: QueueConfig) -> Self {
        self.queue = queue;
        self
    }

    pub fn with_optimistic(mut self, optimistic: OptimisticConfig) -> Self {
        self.optimistic = optimistic;
        self
    }

    pub fn with_batcher(mut self, batcher: BatcherConfig) -> Self {
        self.batcher = batcher;
        self
    }

    pub fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_cache_storage_key(mut self, key: Option<String>) -> Self {
        self.cache_storage_key = key;
        self
    }
}
