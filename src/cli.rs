//! CLI command definitions using clap.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use spawner_reconciler::SpawnerConfig;

/// agentspawner - keep a pool of agent machines at the size a hook asks for
#[derive(Parser, Debug)]
#[command(name = "agentspawner")]
#[command(version)]
#[command(about = "Keeps broker-managed agent machines at the count a converge-to hook asks for")]
#[command(
    long_about = "agentspawner periodically runs a converge-to hook, then requests or releases broker tickets until the number of owned agent machines matches. Each new machine is provisioned with the take hook and deprovisioned with the release hook."
)]
pub struct Cli {
    /// Configuration file (TOML, or JSON with a .json extension)
    #[arg(short, long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Ticket broker endpoint
    #[arg(long, global = true, value_name = "URL")]
    pub broker_url: Option<String>,

    /// Tag attached to every ticket request (repeatable)
    #[arg(short, long = "tag", global = true, value_name = "TAG")]
    pub tags: Vec<String>,

    /// Seconds between reconciliation cycle starts
    #[arg(long, global = true, value_name = "SECS")]
    pub period: Option<u64>,

    /// Kill hooks still running after this many seconds
    #[arg(long, global = true, value_name = "SECS")]
    pub hook_timeout: Option<u64>,

    /// Hook printing the desired machine count
    #[arg(long, global = true, value_name = "PATH")]
    pub converge_to_hook: Option<PathBuf>,

    /// Hook provisioning a newly assigned machine
    #[arg(long, global = true, value_name = "PATH")]
    pub take_hook: Option<PathBuf>,

    /// Hook deprovisioning a machine before its ticket is closed
    #[arg(long, global = true, value_name = "PATH")]
    pub release_hook: Option<PathBuf>,

    /// Log level used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commands {
    /// Print the effective configuration as TOML and exit
    CheckConfig,
}

impl Cli {
    /// Layer command line flags over an already loaded configuration.
    pub fn apply(&self, mut config: SpawnerConfig) -> SpawnerConfig {
        if let Some(url) = &self.broker_url {
            config.broker.url.clone_from(url);
        }
        if !self.tags.is_empty() {
            config.tags.clone_from(&self.tags);
        }
        if let Some(secs) = self.period {
            config.period = Duration::from_secs(secs);
        }
        if let Some(secs) = self.hook_timeout {
            config.hook_timeout = Some(Duration::from_secs(secs));
        }
        if let Some(path) = &self.converge_to_hook {
            config.hooks.converge_to.clone_from(path);
        }
        if let Some(path) = &self.take_hook {
            config.hooks.take.clone_from(path);
        }
        if let Some(path) = &self.release_hook {
            config.hooks.release.clone_from(path);
        }
        config
    }
}
