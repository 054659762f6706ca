//! Daemon configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use spawner_broker::BrokerConfig;

use crate::error::{Error, Result};

/// Environment variable overriding the broker endpoint.
pub const ENV_BROKER_URL: &str = "AGENTSPAWNER_BROKER_URL";
/// Environment variable overriding the tag set (comma separated).
pub const ENV_TAGS: &str = "AGENTSPAWNER_TAGS";
/// Environment variable overriding the period, in seconds.
pub const ENV_PERIOD: &str = "AGENTSPAWNER_PERIOD";

/// Locations of the three lifecycle hooks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookPaths {
    /// Prints the desired resource count.
    #[serde(default = "default_converge_to")]
    pub converge_to: PathBuf,
    /// Provisions a freshly assigned resource.
    #[serde(default = "default_take")]
    pub take: PathBuf,
    /// Deprovisions a resource before its ticket is closed.
    #[serde(default = "default_release")]
    pub release: PathBuf,
}

impl Default for HookPaths {
    fn default() -> Self {
        Self {
            converge_to: default_converge_to(),
            take: default_take(),
            release: default_release(),
        }
    }
}

impl HookPaths {
    /// Resolve all hooks relative to a directory.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            converge_to: dir.join("hook-converge-to"),
            take: dir.join("hook-take"),
            release: dir.join("hook-release"),
        }
    }
}

/// Full configuration of the spawner daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpawnerConfig {
    /// Tags attached to every ticket request.
    #[serde(default = "default_tags")]
    pub tags: Vec<String>,

    /// Interval between reconciliation cycle starts.
    #[serde(with = "duration_secs", default = "default_period")]
    pub period: Duration,

    /// Upper bound on a single hook run; unbounded when unset.
    #[serde(
        with = "option_duration_secs",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub hook_timeout: Option<Duration>,

    /// Broker connection settings.
    #[serde(default)]
    pub broker: BrokerConfig,

    /// Hook locations.
    #[serde(default)]
    pub hooks: HookPaths,
}

impl Default for SpawnerConfig {
    fn default() -> Self {
        Self {
            tags: default_tags(),
            period: default_period(),
            hook_timeout: None,
            broker: BrokerConfig::default(),
            hooks: HookPaths::default(),
        }
    }
}

impl SpawnerConfig {
    /// Load configuration from a file.
    ///
    /// `.json` files are parsed as JSON, everything else as TOML.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;

        if path.extension().is_some_and(|e| e == "json") {
            serde_json::from_str(&content)
                .map_err(|e| Error::invalid_config(format!("failed to parse config: {e}")))
        } else {
            toml::from_str(&content)
                .map_err(|e| Error::invalid_config(format!("failed to parse config: {e}")))
        }
    }

    /// Apply overrides from the process environment.
    pub fn with_env(self) -> Result<Self> {
        self.with_env_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn with_env_from<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_BROKER_URL) {
            self.broker.url = url;
        }

        if let Some(tags) = lookup(ENV_TAGS) {
            self.tags = parse_tags(&tags);
        }

        if let Some(period) = lookup(ENV_PERIOD) {
            let secs = period.trim().parse::<u64>().map_err(|e| {
                Error::invalid_config(format!("{ENV_PERIOD}='{period}' is not a number: {e}"))
            })?;
            self.period = Duration::from_secs(secs);
        }

        Ok(self)
    }

    /// Set the tags.
    #[must_use]
    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Set the period.
    #[must_use]
    pub const fn period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    /// Bound every hook run.
    #[must_use]
    pub const fn hook_timeout(mut self, timeout: Duration) -> Self {
        self.hook_timeout = Some(timeout);
        self
    }

    /// Set the hook locations.
    #[must_use]
    pub fn hooks(mut self, hooks: HookPaths) -> Self {
        self.hooks = hooks;
        self
    }

    /// Check the configuration for values the loop cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.period.is_zero() {
            return Err(Error::invalid_config("period must be greater than zero"));
        }
        if self.tags.is_empty() {
            return Err(Error::invalid_config("at least one tag is required"));
        }
        if let Some(tag) = self.tags.iter().find(|t| t.trim().is_empty()) {
            return Err(Error::invalid_config(format!("blank tag '{tag}'")));
        }
        if self.hook_timeout.is_some_and(|t| t.is_zero()) {
            return Err(Error::invalid_config("hook timeout must be greater than zero"));
        }

        [
            ("converge_to", &self.hooks.converge_to),
            ("take", &self.hooks.take),
            ("release", &self.hooks.release),
        ]
        .into_iter()
        .find(|(_, path)| path.as_os_str().is_empty())
        .map_or(Ok(()), |(name, _)| {
            Err(Error::invalid_config(format!("{name} hook path is empty")))
        })
    }

    /// Render the configuration as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| Error::invalid_config(format!("failed to render config: {e}")))
    }
}

/// Split a comma separated tag list, dropping blanks.
pub fn parse_tags(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

fn default_tags() -> Vec<String> {
    vec!["arch_x86_64".to_string()]
}

const fn default_period() -> Duration {
    Duration::from_secs(30)
}

fn default_converge_to() -> PathBuf {
    PathBuf::from("./hook-converge-to")
}

fn default_take() -> PathBuf {
    PathBuf::from("./hook-take")
}

fn default_release() -> PathBuf {
    PathBuf::from("./hook-release")
}

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

mod option_duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        duration: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        duration.map(|d| d.as_secs()).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        let secs = Option::<u64>::deserialize(deserializer)?;
        Ok(secs.map(Duration::from_secs))
    }
}
