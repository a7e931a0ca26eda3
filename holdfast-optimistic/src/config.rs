//! Optimistic manager configuration.

use holdfast_types::duration_ms;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Shortest sweep period accepted.
pub const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(1);

/// Lifetimes of optimistic updates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OptimisticConfig {
    /// Pending updates older than this are failed by the sweep.
    #[serde(with = "duration_ms")]
    pub pending_timeout: Duration,
    /// Confirmed updates older than this are purged.
    #[serde(with = "duration_ms")]
    pub confirmed_retention: Duration,
    /// Failed updates older than this are purged.
    #[serde(with = "duration_ms")]
    pub failed_retention: Duration,
    /// Period of the background sweep.
    #[serde(with = "duration_ms")]
    pub sweep_interval: Duration,
}

impl Default for OptimisticConfig {
    fn default() -> Self {
        Self {
            pending_timeout: Duration::from_secs(30),
            confirmed_retention: Duration::from_secs(5 * 60),
            failed_retention: Duration::from_secs(10 * 60),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl OptimisticConfig {
    pub fn with_pending_timeout(mut self, timeout: Duration) -> Self {
        self.pending_timeout = timeout;
        self
    }

    pub fn with_retention(mut self, confirmed: Duration, failed: Duration) -> Self {
        self.confirmed_retention = confirmed;
        self.failed_retention = failed;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval.max(MIN_SWEEP_INTERVAL);
        self
    }

    /// Raises a zero sweep period loaded from a config file.
    pub fn normalized(self) -> Self {
        let interval = self.sweep_interval;
        self.with_sweep_interval(interval)
    }
}
