//! Error types for hook dispatch and delivery.
//!
//! `DeliveryError` describes why a single hook delivery failed; workers log
//! and count it, and it never leaves the worker. `DispatchError` is the only
//! error a producer can observe, and it is limited to failures that happen
//! before a job is enqueued.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for delivery operations.
pub type Result<T> = std::result::Result<T, DeliveryError>;

/// Failure of one delivery attempt to one hook.
#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    /// Network-level connectivity failure.
    #[error("network connection failed: {message}")]
    NetworkError {
        /// Error message describing the network failure
        message: String,
    },

    /// The configured delivery timeout elapsed.
    #[error("request timeout after {timeout_ms}ms")]
    Timeout {
        /// Timeout that was exceeded, in milliseconds
        timeout_ms: u64,
    },

    /// The hook answered with a status of 400 or above.
    #[error("hook rejected delivery: HTTP {status_code}")]
    HttpStatus {
        /// HTTP status code
        status_code: u16,
        /// Response body, truncated
        body: String,
    },

    /// The HTTP client or dispatcher could not be configured.
    #[error("invalid delivery configuration: {message}")]
    ConfigurationError {
        /// Configuration error message
        message: String,
    },
}

impl DeliveryError {
    /// Creates a network error from a message.
    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkError { message: message.into() }
    }

    /// Creates a timeout error.
    pub fn timeout(timeout: Duration) -> Self {
        Self::Timeout { timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX) }
    }

    /// Creates an error for a rejecting HTTP status.
    pub fn http_status(status_code: u16, body: impl Into<String>) -> Self {
        Self::HttpStatus { status_code, body: body.into() }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::ConfigurationError { message: message.into() }
    }

    /// HTTP status code, when the hook responded.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status_code, .. } => Some(*status_code),
            _ => None,
        }
    }

    /// Short label used as a structured log field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NetworkError { .. } => "network",
            Self::Timeout { .. } => "timeout",
            Self::HttpStatus { .. } => "http_status",
            Self::ConfigurationError { .. } => "configuration",
        }
    }
}

/// Errors returned to the producer by the dispatcher.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The payload could not be encoded; nothing was enqueued.
    #[error("payload serialization failed: {message}")]
    Serialization {
        /// Encoder error message
        message: String,
    },

    /// The dispatcher has been shut down and no longer accepts jobs.
    #[error("dispatcher is shut down")]
    ShutDown,

    /// Workers did not finish their current job within the shutdown timeout.
    #[error("worker shutdown timed out after {timeout:?}")]
    ShutdownTimeout {
        /// Timeout that was exceeded
        timeout: Duration,
    },

    /// Invalid pool configuration or HTTP client setup.
    #[error(transparent)]
    Delivery(#[from] DeliveryError),
}

impl From<serde_json::Error> for DispatchError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization { message: err.to_string() }
    }
}
