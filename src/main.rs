//! # agentspawner
//!
//! Daemon that keeps a pool of broker-managed agent machines at the size a
//! `converge-to` hook asks for.
//!
//! ## Startup
//!
//! 1. **Configuration** - defaults, then the config file, then
//!    `AGENTSPAWNER_*` environment variables, then command line flags
//! 2. **Broker client** - JSON-RPC client for the ticket broker
//! 3. **Hooks** - the converge-to, take and release executables
//! 4. **Reconciliation loop** - runs until a fatal error or a shutdown signal
//!
//! ## Shutdown
//!
//! SIGINT and SIGTERM ask the loop to stop. A cycle that is already running
//! finishes first.

#![forbid(unsafe_code)]
#![forbid(clippy::unwrap_used)]
#![forbid(clippy::panic)]
#![deny(clippy::expect_used)]

mod cli;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use spawner_broker::BrokerClient;
use spawner_reconciler::{
    HookRunner, LoopConfig, LoopStopper, ReconcileLoop, ResourcePoolBuilder, SpawnerConfig,
};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(&cli.log_level);

    let config = load_config(&cli)?;

    match cli.command {
        Some(Commands::CheckConfig) => {
            let rendered = config
                .to_toml()
                .context("Failed to render configuration")?;
            print!("{rendered}");
            Ok(())
        }
        None => run(config).await,
    }
}

/// Initialize tracing subscriber.
///
/// `RUST_LOG` wins over `--log-level` when set.
fn init_tracing(level: &str) {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Build the effective configuration.
fn load_config(cli: &Cli) -> Result<SpawnerConfig> {
    let base = match &cli.config {
        Some(path) => SpawnerConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => SpawnerConfig::default(),
    };

    let config = cli.apply(
        base.with_env()
            .context("Invalid AGENTSPAWNER_* environment override")?,
    );
    config.validate().context("Invalid configuration")?;

    Ok(config)
}

/// Wire the broker, hooks and pool together and run the loop.
async fn run(config: SpawnerConfig) -> Result<()> {
    info!(
        broker = %config.broker.url,
        tags = ?config.tags,
        period_secs = config.period.as_secs(),
        "agentspawner starting"
    );

    let broker =
        BrokerClient::with_config(config.broker.clone()).context("Failed to create broker client")?;
    let hooks = HookRunner::with_processes(config.hooks.clone(), config.hook_timeout);

    let pool = ResourcePoolBuilder::new()
        .with_broker(Arc::new(broker))
        .with_hooks(hooks)
        .tags(config.tags.clone())
        .build()
        .context("Failed to build resource pool")?;

    let mut reconcile = ReconcileLoop::new(pool, LoopConfig { period: config.period });
    spawn_shutdown_listener(reconcile.stopper());

    match reconcile.run().await {
        Ok(()) => {
            info!(
                owned = reconcile.pool().owned_count(),
                "agentspawner stopped"
            );
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Reconciliation loop failed");
            Err(e).context("Reconciliation loop failed")
        }
    }
}

fn spawn_shutdown_listener(stopper: LoopStopper) {
    tokio::spawn(async move {
        wait_for_shutdown().await;
        stopper.stop();
    });
}

/// Wait for SIGINT or SIGTERM.
async fn wait_for_shutdown() {
    tokio::select! {
        result = signal::ctrl_c() => match result {
            Ok(()) => info!("Received Ctrl+C, stopping after the current cycle"),
            Err(err) => {
                error!("Failed to listen for shutdown signal: {}", err);
                terminate().await;
            }
        },
        () = terminate() => info!("Received SIGTERM, stopping after the current cycle"),
    }
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            term.recv().await;
        }
        Err(err) => {
            error!("Failed to listen for SIGTERM: {}", err);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}
