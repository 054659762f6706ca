//! Configuration for the broker client.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the [`BrokerClient`](crate::BrokerClient).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Broker endpoint, parsed when the client is built.
    #[serde(default = "default_url")]
    pub url: String,

    /// Timeout for a single HTTP request.
    #[serde(with = "duration_secs", default = "default_request_timeout")]
    pub request_timeout: Duration,

    /// How often `wait` polls a ticket that is not ready yet.
    #[serde(with = "duration_secs", default = "default_poll_interval")]
    pub poll_interval: Duration,

    /// Pause between reconnect attempts while the broker is unreachable.
    #[serde(with = "duration_secs", default = "default_reconnect_delay")]
    pub reconnect_delay: Duration,

    /// Keep retrying calls while the broker is down instead of failing.
    #[serde(default = "default_survive_server_restart")]
    pub survive_server_restart: bool,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            request_timeout: default_request_timeout(),
            poll_interval: default_poll_interval(),
            reconnect_delay: default_reconnect_delay(),
            survive_server_restart: default_survive_server_restart(),
        }
    }
}

impl BrokerConfig {
    /// Create a new config for the given endpoint.
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Set the request timeout.
    #[must_use]
    pub const fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the poll interval used while waiting for a ticket.
    #[must_use]
    pub const fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the delay between reconnect attempts.
    #[must_use]
    pub const fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Enable or disable retrying across broker restarts.
    #[must_use]
    pub const fn survive_server_restart(mut self, enabled: bool) -> Self {
        self.survive_server_restart = enabled;
        self
    }
}

fn default_url() -> String {
    "http://localhost:49100".to_string()
}

const fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

const fn default_poll_interval() -> Duration {
    Duration::from_secs(3)
}

const fn default_reconnect_delay() -> Duration {
    Duration::from_secs(3)
}

const fn default_survive_server_restart() -> bool {
    true
}

/// Serialization helper for Duration as seconds.
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
