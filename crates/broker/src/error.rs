//! Error types for the broker crate.

use thiserror::Error;

/// Result type for broker operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while talking to the ticket broker.
#[derive(Error, Debug)]
pub enum Error {
    /// Failed to reach the broker.
    #[error("connection failed: {reason}")]
    ConnectionFailed { reason: String },

    /// Request to the broker timed out.
    #[error("request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The broker answered with something we cannot interpret.
    #[error("invalid response: {reason}")]
    InvalidResponse { reason: String },

    /// The broker rejected the call.
    #[error("broker call '{method}' failed ({code}): {message}")]
    Rpc {
        method: String,
        code: i64,
        message: String,
    },

    /// Configuration error.
    #[error("configuration error: {reason}")]
    ConfigError { reason: String },

    /// HTTP error from reqwest.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// URL parse error.
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),
}

impl Error {
    /// Create a connection failed error.
    pub fn connection_failed(reason: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            reason: reason.into(),
        }
    }

    /// Create a timeout error.
    pub const fn timeout(timeout_ms: u64) -> Self {
        Self::Timeout { timeout_ms }
    }

    /// Create an invalid response error.
    pub fn invalid_response(reason: impl Into<String>) -> Self {
        Self::InvalidResponse {
            reason: reason.into(),
        }
    }

    /// Create an RPC error.
    pub fn rpc(method: impl Into<String>, code: i64, message: impl Into<String>) -> Self {
        Self::Rpc {
            method: method.into(),
            code,
            message: message.into(),
        }
    }

    /// Create a config error.
    pub fn config_error(reason: impl Into<String>) -> Self {
        Self::ConfigError {
            reason: reason.into(),
        }
    }

    /// Whether the broker was unreachable, as opposed to answering badly.
    ///
    /// Only these errors are retried when requests survive broker restarts.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ConnectionFailed { .. } | Self::Timeout { .. } => true,
            Self::Http(e) => e.is_connect() || e.is_timeout(),
            _ => false,
        }
    }
}
