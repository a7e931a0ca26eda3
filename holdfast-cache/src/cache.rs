//! The query cache.

use crate::config::CacheConfig;
use crate::error::CacheResult;
use crate::key::CacheKey;
use holdfast_pool::ConnectionPool;
use holdfast_remote::{RemoteResult, RemoteService};
use holdfast_store::{DurableStore, JsonStoreExt};
use holdfast_types::{Clock, SystemClock, Timestamp, duration_ms, lock};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

/// A stored value and its freshness window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub data: Value,
    pub timestamp: Timestamp,
    #[serde(with = "duration_ms")]
    pub expiry: Duration,
    pub user: String,
}

impl CacheEntry {
    /// True once more than `expiry` has passed since the entry was stored.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        now.since(self.timestamp) > self.expiry
    }
}

/// Hit and eviction counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Entries dropped because they were stale when read or swept.
    pub expired: u64,
    /// Entries dropped to make room.
    pub evicted: u64,
    pub entries: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    entries: BTreeMap<String, CacheEntry>,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    stats: CacheStats,
}

struct CacheInner {
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<CacheState>,
}

/// TTL-bounded, user-scoped cache of query results. Cheap to clone.
///
/// Values are held as JSON so any `Serialize` type can be cached and the
/// live set can be snapshotted to a [`DurableStore`].
#[derive(Clone)]
pub struct QueryCache {
    inner: Arc<CacheInner>,
}

impl QueryCache {
    pub fn new(config: CacheConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                config,
                clock,
                state: Mutex::new(CacheState::default()),
            }),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// TTL used for `resource` when none is given explicitly.
    pub fn ttl_for(&self, resource: &str) -> Duration {
        self.inner.config.ttl_for(resource)
    }

    /// Returns the cached value, or `None` if absent or stale. A stale entry
    /// is evicted.
    pub fn get<T: DeserializeOwned>(&self, key: &CacheKey) -> CacheResult<Option<T>> {
        let now = self.inner.clock.now();
        let data = {
            let mut state = lock(&self.inner.state);
            let lookup = state
                .entries
                .get(key.as_str())
                .map(|entry| (!entry.is_expired(now)).then(|| entry.data.clone()));
            match lookup {
                Some(Some(data)) => {
                    state.stats.hits += 1;
                    data
                }
                Some(None) => {
                    state.entries.remove(key.as_str());
                    state.stats.expired += 1;
                    state.stats.misses += 1;
                    debug!(key = %key, "cache entry expired");
                    return Ok(None);
                }
                None => {
                    state.stats.misses += 1;
                    return Ok(None);
                }
            }
        };
        Ok(Some(serde_json::from_value(data)?))
    }

    /// Stores `data` for `ttl`. At capacity the entry with the oldest
    /// timestamp is evicted first.
    pub fn set<T: Serialize>(&self, key: &CacheKey, data: &T, ttl: Duration) -> CacheResult<()> {
        let data = serde_json::to_value(data)?;
        let entry = CacheEntry {
            data,
            timestamp: self.inner.clock.now(),
            expiry: ttl,
            user: key.user().to_string(),
        };

        let mut state = lock(&self.inner.state);
        if !state.entries.contains_key(key.as_str())
            && state.entries.len() >= self.inner.config.max_entries
        {
            evict_oldest(&mut state);
        }
        state.entries.insert(key.as_str().to_string(), entry);
        Ok(())
    }

    /// Stores `data` with the TTL configured for the key's resource.
    pub fn insert<T: Serialize>(&self, key: &CacheKey, data: &T) -> CacheResult<()> {
        self.set(key, data, self.ttl_for(key.resource()))
    }

    /// Returns the cached value or fetches it on a pooled connection and
    /// caches the result. `ttl` defaults to the resource TTL.
    pub async fn fetch_through<T, F, Fut>(
        &self,
        pool: &ConnectionPool,
        key: &CacheKey,
        ttl: Option<Duration>,
        fetch: F,
    ) -> CacheResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(Arc<dyn RemoteService>) -> Fut,
        Fut: Future<Output = RemoteResult<T>>,
    {
        if let Some(hit) = self.get(key)? {
            return Ok(hit);
        }
        debug!(key = %key, "cache miss; fetching");

        let value = pool.with_connection(fetch).await?;
        let ttl = ttl.unwrap_or_else(|| self.ttl_for(key.resource()));
        self.set(key, &value, ttl)?;
        Ok(value)
    }

    /// Removes one entry. Returns true if it existed.
    pub fn invalidate(&self, key: &CacheKey) -> bool {
        lock(&self.inner.state).entries.remove(key.as_str()).is_some()
    }

    /// Removes every entry whose rendered key starts with `prefix`.
    pub fn clear_pattern(&self, prefix: &str) -> usize {
        let removed = self.remove_where(|key, _| key.starts_with(prefix));
        debug!(prefix, removed, "cache pattern cleared");
        removed
    }

    /// Removes every entry scoped to `user`.
    pub fn clear_for_user(&self, user: &str) -> usize {
        let removed = self.remove_where(|_, entry| entry.user == user);
        debug!(user, removed, "cache cleared for user");
        removed
    }

    /// Removes every entry for `resource` belonging to `user`.
    pub fn clear_resource_for_user(&self, resource: &str, user: &str) -> usize {
        self.remove_where(|key, entry| entry.user == user && resource_of(key) == resource)
    }

    pub fn clear(&self) {
        let mut state = lock(&self.inner.state);
        let dropped = state.entries.len();
        state.entries.clear();
        info!(dropped, "cache cleared");
    }

    /// Drops every stale entry without waiting for it to be read.
    pub fn purge_expired(&self) -> usize {
        let now = self.inner.clock.now();
        let mut state = lock(&self.inner.state);
        let before = state.entries.len();
        state.entries.retain(|_, entry| !entry.is_expired(now));
        let purged = before - state.entries.len();
        state.stats.expired += purged as u64;
        purged
    }

    /// Number of stored entries, stale ones included until they are read
    /// or purged.
    pub fn len(&self) -> usize {
        lock(&self.inner.state).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let state = lock(&self.inner.state);
        CacheStats {
            entries: state.entries.len(),
            ..state.stats
        }
    }

    /// Writes the fresh entries to `store` under `storage_key`. Returns how
    /// many were written.
    pub fn save_to(&self, store: &dyn DurableStore, storage_key: &str) -> CacheResult<usize> {
        let now = self.inner.clock.now();
        let snapshot = {
            let state = lock(&self.inner.state);
            Snapshot {
                entries: state
                    .entries
                    .iter()
                    .filter(|(_, entry)| !entry.is_expired(now))
                    .map(|(k, entry)| (k.clone(), entry.clone()))
                    .collect(),
            }
        };
        store.save_json(storage_key, &snapshot)?;
        let saved = snapshot.entries.len();
        debug!(storage_key, saved, "cache snapshot saved");
        Ok(saved)
    }

    /// Restores a snapshot written by [`save_to`](Self::save_to), skipping
    /// entries that went stale meanwhile. Returns how many were restored.
    pub fn load_from(&self, store: &dyn DurableStore, storage_key: &str) -> CacheResult<usize> {
        let Some(snapshot) = store.load_json::<Snapshot>(storage_key)? else {
            return Ok(0);
        };
        let now = self.inner.clock.now();
        let mut fresh: Vec<(String, CacheEntry)> = snapshot
            .entries
            .into_iter()
            .filter(|(_, entry)| !entry.is_expired(now))
            .collect();
        // Newest first, so capacity keeps the most recent entries.
        fresh.sort_by(|a, b| b.1.timestamp.cmp(&a.1.timestamp));

        let mut state = lock(&self.inner.state);
        let mut restored = 0;
        for (key, entry) in fresh {
            if state.entries.contains_key(&key) {
                continue;
            }
            if state.entries.len() >= self.inner.config.max_entries {
                warn!(storage_key, "cache full; remaining snapshot entries skipped");
                break;
            }
            state.entries.insert(key, entry);
            restored += 1;
        }
        info!(storage_key, restored, "cache snapshot loaded");
        Ok(restored)
    }

    fn remove_where(&self, mut pred: impl FnMut(&str, &CacheEntry) -> bool) -> usize {
        let mut state = lock(&self.inner.state);
        let before = state.entries.len();
        state.entries.retain(|key, entry| !pred(key, entry));
        before - state.entries.len()
    }
}

fn evict_oldest(state: &mut CacheState) {
    let oldest = state
        .entries
        .iter()
        .min_by_key(|(_, entry)| entry.timestamp)
        .map(|(key, _)| key.clone());
    if let Some(key) = oldest {
        state.entries.remove(&key);
        state.stats.evicted += 1;
        debug!(key = %key, "cache full; evicted oldest entry");
    }
}

/// Resource segment of a rendered key.
fn resource_of(rendered: &str) -> &str {
    let route = rendered.split('|').next().unwrap_or("");
    route
        .split('/')
        .find(|segment| !segment.is_empty())
        .unwrap_or("")
}

impl fmt::Debug for QueryCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryCache")
            .field("config", &self.inner.config)
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_of_rendered_key() {
        assert_eq!(resource_of("goals|limit=5|u:u1"), "goals");
        assert_eq!(resource_of("/entries/recent||u:u1"), "entries");
    }

    #[test]
    fn entry_expires_strictly_after_expiry() {
        let entry = CacheEntry {
            data: Value::Null,
            timestamp: Timestamp::from_millis(1_000),
            expiry: Duration::from_millis(1_000),
            user: "u1".into(),
        };
        assert!(!entry.is_expired(Timestamp::from_millis(2_000)));
        assert!(entry.is_expired(Timestamp::from_millis(2_001)));
    }
}
