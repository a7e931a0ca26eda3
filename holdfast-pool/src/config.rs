//! Pool configuration.

use holdfast_types::duration_ms;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Shortest period accepted for the health check and acquire polling.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Configuration for the connection pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PoolConfig {
    /// Connections kept open even when idle.
    pub min_connections: usize,
    /// Hard upper bound on open connections.
    pub max_connections: usize,
    /// How long `acquire` waits for a free connection.
    #[serde(with = "duration_ms")]
    pub acquire_timeout: Duration,
    /// Idle connections older than this are retired (down to the minimum).
    #[serde(with = "duration_ms")]
    pub idle_timeout: Duration,
    /// Period of the background health check.
    #[serde(with = "duration_ms")]
    pub health_check_interval: Duration,
    /// How often a waiting `acquire` re-checks for a free connection.
    #[serde(with = "duration_ms")]
    pub acquire_poll_interval: Duration,
    /// Errors after which a connection is retired and replaced.
    pub max_errors: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_connections: 2,
            max_connections: 10,
            acquire_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(300),
            health_check_interval: Duration::from_secs(60),
            acquire_poll_interval: Duration::from_millis(100),
            max_errors: 3,
        }
    }
}

impl PoolConfig {
    /// Sets the minimum and maximum pool size.
    pub fn with_bounds(mut self, min: usize, max: usize) -> Self {
        self.min_connections = min;
        self.max_connections = max.max(1).max(min);
        self
    }

    /// Sets the acquire timeout.
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Sets the idle timeout.
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Sets the health check interval (at least [`MIN_POLL_INTERVAL`]).
    pub fn with_health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval = interval.max(MIN_POLL_INTERVAL);
        self
    }

    /// Repairs values a config file may carry: an inverted or zero maximum
    /// and zero periods.
    pub fn normalized(self) -> Self {
        let (min, max) = (self.min_connections, self.max_connections);
        let interval = self.health_check_interval;
        let mut config = self.with_bounds(min, max).with_health_check_interval(interval);
        config.acquire_poll_interval = config.acquire_poll_interval.max(MIN_POLL_INTERVAL);
        config
    }
}
