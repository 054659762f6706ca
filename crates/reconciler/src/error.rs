//! Error types for the reconciler crate.

use thiserror::Error;

/// Result type alias for reconciler operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Reconciler error types.
///
/// Everything here is fatal to the loop. Recoverable outcomes (a bad
/// desired count, a failed release) never surface as errors.
#[derive(Error, Debug)]
pub enum Error {
    /// A hook could not be started at all.
    #[error("hook '{hook}' could not be run: {reason}")]
    HookSpawn { hook: String, reason: String },

    /// A hook did not finish within the configured bound.
    #[error("hook '{hook}' timed out after {timeout_ms}ms")]
    HookTimeout { hook: String, timeout_ms: u64 },

    /// The take hook rejected a resource.
    #[error("provisioning '{payload}' failed: {reason}")]
    ProvisionFailed { payload: String, reason: String },

    /// The broker call failed.
    #[error("broker error: {0}")]
    Broker(#[from] spawner_broker::Error),

    /// Invalid configuration.
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// I/O error while reading configuration.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a hook spawn error.
    pub fn hook_spawn(hook: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::HookSpawn {
            hook: hook.into(),
            reason: reason.into(),
        }
    }

    /// Create a hook timeout error.
    pub fn hook_timeout(hook: impl Into<String>, timeout_ms: u64) -> Self {
        Self::HookTimeout {
            hook: hook.into(),
            timeout_ms,
        }
    }

    /// Create a provisioning failed error.
    pub fn provision_failed(payload: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ProvisionFailed {
            payload: payload.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid config error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::provision_failed("vm-1", "exit status: 2");
        assert!(err.to_string().contains("vm-1"));
        assert!(err.to_string().contains("exit status: 2"));
    }

    #[test]
    fn test_broker_error_converts() {
        let err: Error = spawner_broker::Error::connection_failed("refused").into();
        assert!(matches!(err, Error::Broker(_)));
        assert!(err.to_string().contains("refused"));
    }
}
