//! Remote service error types.

use holdfast_types::{Classify, ErrorClass};
use std::time::Duration;
use thiserror::Error;

/// Result type for remote operations.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Provider error codes that mean "rate limited" even without a 429.
pub const RATE_LIMIT_CODES: &[&str] = &[
    "rate_limit_exceeded",
    "over_request_rate_limit",
    "too_many_requests",
];

/// Errors that can occur while calling the remote service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("rate limited: retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("provider error {code}: {message}")]
    Provider { code: String, message: String },

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl RemoteError {
    /// Shorthand for an HTTP status error.
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            message: message.into(),
        }
    }

    /// Shorthand for a provider-coded error.
    pub fn provider(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Returns the retry-after duration if the server gave one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            RemoteError::RateLimited { retry_after_secs } => {
                Some(Duration::from_secs(*retry_after_secs))
            }
            _ => None,
        }
    }
}

impl Classify for RemoteError {
    fn class(&self) -> ErrorClass {
        match self {
            RemoteError::Network(_) | RemoteError::Timeout => ErrorClass::Transient,
            RemoteError::RateLimited { .. } => ErrorClass::RateLimited,
            RemoteError::Http { status, .. } => match *status {
                429 => ErrorClass::RateLimited,
                408 | 500..=599 => ErrorClass::Transient,
                _ => ErrorClass::Fatal,
            },
            RemoteError::Provider { code, .. } => {
                if RATE_LIMIT_CODES.contains(&code.as_str()) {
                    ErrorClass::RateLimited
                } else {
                    ErrorClass::Fatal
                }
            }
            RemoteError::InvalidPayload(_) | RemoteError::NotFound(_) => ErrorClass::Fatal,
        }
    }
}

impl From<serde_json::Error> for RemoteError {
    fn from(e: serde_json::Error) -> Self {
        RemoteError::InvalidPayload(e.to_string())
    }
}
