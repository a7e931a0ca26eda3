//! TTL query cache for the Holdfast sync core.
//!
//! Reads go through a [`QueryCache`] keyed by [`CacheKey`]: a route, its
//! sorted query parameters, and a mandatory user scope. An entry older than
//! its expiry is treated as absent and evicted on the next read. When the
//! cache is full the entry with the oldest timestamp makes room.
//!
//! Invalidation after confirmed writes is best effort, so TTLs are kept
//! short and tuned per resource (see [`CacheConfig::ttl_for`]).
//!
//! # Example
//!
//! ```
//! use holdfast_cache::{CacheConfig, CacheKey, QueryCache};
//! use std::time::Duration;
//!
//! let cache = QueryCache::new(CacheConfig::default());
//! let key = CacheKey::new("goals").param("active", true).user("u1").build().unwrap();
//!
//! cache.set(&key, &vec!["g1", "g2"], Duration::from_secs(60)).unwrap();
//! let goals: Option<Vec<String>> = cache.get(&key).unwrap();
//! assert_eq!(goals.unwrap().len(), 2);
//! ```

mod cache;
mod config;
mod error;
mod key;

pub use cache::{CacheEntry, CacheStats, QueryCache};
pub use config::CacheConfig;
pub use error::{CacheError, CacheResult};
pub use key::{CacheKey, CacheKeyBuilder};
