//! Cache configuration.

use holdfast_types::duration_ms;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Capacity and freshness limits of the query cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CacheConfig {
    /// Entries kept before the oldest is evicted.
    pub max_entries: usize,
    /// TTL for resources without an entry in `resource_ttls`.
    #[serde(with = "duration_ms")]
    pub default_ttl: Duration,
    /// Per-resource TTLs, keyed by the first route segment.
    #[serde(with = "ttl_map")]
    pub resource_ttls: BTreeMap<String, Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        let resource_ttls = [
            ("categories", Duration::from_secs(5 * 60)),
            ("goals", Duration::from_secs(2 * 60)),
            ("entries", Duration::from_secs(30)),
        ]
        .into_iter()
        .map(|(resource, ttl)| (resource.to_string(), ttl))
        .collect();

        Self {
            max_entries: 500,
            default_ttl: Duration::from_secs(60),
            resource_ttls,
        }
    }
}

impl CacheConfig {
    /// Sets the capacity. Zero is treated as one.
    pub fn with_max_entries(mut self, max: usize) -> Self {
        self.max_entries = max.max(1);
        self
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn with_resource_ttl(mut self, resource: impl Into<String>, ttl: Duration) -> Self {
        self.resource_ttls.insert(resource.into(), ttl);
        self
    }

    /// TTL for `resource`, falling back to the default.
    pub fn ttl_for(&self, resource: &str) -> Duration {
        self.resource_ttls
            .get(resource)
            .copied()
            .unwrap_or(self.default_ttl)
    }
}

/// Serializes a map of durations as integer milliseconds.
mod ttl_map {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::BTreeMap;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        map: &BTreeMap<String, Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        map.iter()
            .map(|(k, v)| (k.as_str(), v.as_millis() as u64))
            .collect::<BTreeMap<_, _>>()
            .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<String, Duration>, D::Error> {
        let raw = BTreeMap::<String, u64>::deserialize(deserializer)?;
        Ok(raw
            .into_iter()
            .map(|(k, ms)| (k, Duration::from_millis(ms)))
            .collect())
    }
}
