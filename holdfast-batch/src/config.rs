//! Batcher configuration.

use holdfast_types::duration_ms;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the request batcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BatcherConfig {
    /// Upper bound on requests per batch.
    pub max_batch_size: usize,
    /// Upper bound on batches executing at once.
    pub max_concurrent_batches: usize,
    /// How long a partial batch waits to fill before it is cut.
    #[serde(with = "duration_ms")]
    pub batch_delay: Duration,
    /// Retries after the first attempt for transient failures.
    pub retry_count: u32,
    /// Base delay for exponential backoff.
    #[serde(with = "duration_ms")]
    pub retry_delay: Duration,
    /// Global pause after a rate-limit signal.
    #[serde(with = "duration_ms")]
    pub rate_limit_cooldown: Duration,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 5,
            max_concurrent_batches: 2,
            batch_delay: Duration::from_millis(50),
            retry_count: 3,
            retry_delay: Duration::from_secs(1),
            rate_limit_cooldown: Duration::from_secs(60),
        }
    }
}

impl BatcherConfig {
    /// Sets the maximum batch size (at least 1).
    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size.max(1);
        self
    }

    /// Sets the number of batches allowed in flight (at least 1).
    pub fn with_max_concurrent_batches(mut self, n: usize) -> Self {
        self.max_concurrent_batches = n.max(1);
        self
    }

    /// Sets the batch fill window.
    pub fn with_batch_delay(mut self, delay: Duration) -> Self {
        self.batch_delay = delay;
        self
    }

    /// Sets the retry budget and backoff base.
    pub fn with_retry(mut self, count: u32, delay: Duration) -> Self {
        self.retry_count = count;
        self.retry_delay = delay;
        self
    }

    /// Sets the rate-limit cooldown.
    pub fn with_rate_limit_cooldown(mut self, cooldown: Duration) -> Self {
        self.rate_limit_cooldown = cooldown;
        self
    }

    /// Raises bounds loaded as zero to one so the dispatcher can always
    /// make progress.
    pub fn normalized(self) -> Self {
        let (size, concurrent) = (self.max_batch_size, self.max_concurrent_batches);
        self.with_max_batch_size(size).with_max_concurrent_batches(concurrent)
    }

    /// Total attempts a request may make.
    pub fn max_attempts(&self) -> u32 {
        self.retry_count.saturating_add(1)
    }

    /// Delay before retrying after the zero-based `attempt` failed:
    /// `retry_delay * 2^attempt`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.min(16);
        self.retry_delay.saturating_mul(factor)
    }
}
