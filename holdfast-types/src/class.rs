//! Error taxonomy shared by the batcher, pool, and queue.

use serde::{Deserialize, Serialize};
use std::fmt;

/// How a failure should be handled by the resilience layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Network failure, timeout, or 5xx. Retried with backoff.
    Transient,
    /// The backend asked us to slow down. Trips the global cooldown.
    RateLimited,
    /// Validation failures and other 4xx. Surfaced immediately.
    Fatal,
}

impl ErrorClass {
    /// Returns true if a retry may succeed without caller intervention.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, ErrorClass::Transient)
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorClass::Transient => "transient",
            ErrorClass::RateLimited => "rate_limited",
            ErrorClass::Fatal => "fatal",
        };
        f.write_str(name)
    }
}

/// Errors that know which [`ErrorClass`] they belong to.
pub trait Classify {
    /// Returns the class of this error.
    fn class(&self) -> ErrorClass;

    /// Returns true if this error is worth retrying.
    fn is_retryable(&self) -> bool {
        self.class().is_retryable()
    }

    /// Returns true if this error is a rate-limit signal.
    fn is_rate_limited(&self) -> bool {
        self.class() == ErrorClass::RateLimited
    }
}
