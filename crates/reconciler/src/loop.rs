//! Continuous reconciliation loop.

use std::cmp::Ordering;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::Result;
use crate::pool::ResourcePool;
use crate::types::{CycleAction, CycleReport, drift};

/// Configuration for the reconciliation loop.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Interval between reconciliation cycle starts.
    pub period: Duration,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(30),
        }
    }
}

/// Continuous reconciliation loop.
///
/// Each cycle asks the converge-to hook for the desired count, starts or
/// stops resources to close the gap, then sleeps for whatever is left of the
/// period. Cycles never overlap.
pub struct ReconcileLoop {
    /// The pool being reconciled.
    pool: ResourcePool,
    /// Loop configuration.
    config: LoopConfig,
    /// Stop signal receiver.
    stop_rx: watch::Receiver<bool>,
    /// Stop signal sender (for external control).
    stop_tx: watch::Sender<bool>,
}

impl ReconcileLoop {
    /// Create a new reconciliation loop.
    pub fn new(pool: ResourcePool, config: LoopConfig) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        Self {
            pool,
            config,
            stop_rx,
            stop_tx,
        }
    }

    /// Run the reconciliation loop.
    ///
    /// Runs until stopped through a [`LoopStopper`], or until a cycle fails.
    /// Transient and deprovisioning failures never end the loop; only a
    /// failed provisioning does.
    pub async fn run(&mut self) -> Result<()> {
        info!(
            period_ms = self.config.period.as_millis(),
            tags = ?self.pool.tags(),
            "Starting reconciliation loop"
        );

        loop {
            if *self.stop_rx.borrow_and_update() {
                info!("Reconciliation loop stopped");
                return Ok(());
            }

            let cycle_start = Instant::now();
            let report = self.reconcile_once().await?;
            log_report(&report);

            let sleep = remaining_period(self.config.period, cycle_start.elapsed());
            if sleep.is_zero() {
                debug!("Cycle overran the period, continuing immediately");
                continue;
            }

            debug!(sleep_ms = sleep.as_millis(), "Sleeping");
            tokio::select! {
                () = tokio::time::sleep(sleep) => {}
                _ = self.stop_rx.changed() => {
                    info!("Reconciliation loop stopped");
                    return Ok(());
                }
            }
        }
    }

    /// Run a single reconciliation cycle.
    pub async fn reconcile_once(&mut self) -> Result<CycleReport> {
        let desired = self.pool.hooks().converge_to().await?;
        let owned_before = self.pool.owned_count();
        let drift = drift(desired, owned_before);

        let action = match drift.cmp(&0) {
            Ordering::Greater => {
                let count = usize::try_from(drift).unwrap_or(usize::MAX);
                CycleAction::Started {
                    tickets: self.pool.start(count).await?,
                }
            }
            Ordering::Less => {
                let requested = usize::try_from(drift.unsigned_abs()).unwrap_or(usize::MAX);
                CycleAction::Stopped {
                    requested,
                    outcome: self.pool.stop(requested).await,
                }
            }
            Ordering::Equal => CycleAction::Idle,
        };

        Ok(CycleReport {
            desired,
            owned_before,
            owned_after: self.pool.owned_count(),
            action,
        })
    }

    /// Get the pool.
    pub const fn pool(&self) -> &ResourcePool {
        &self.pool
    }

    /// Get the configuration.
    pub const fn config(&self) -> &LoopConfig {
        &self.config
    }

    /// Stop the loop.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// Get a stopper handle.
    pub fn stopper(&self) -> LoopStopper {
        LoopStopper {
            stop_tx: self.stop_tx.clone(),
        }
    }
}

/// Handle to stop a reconciliation loop.
///
/// The loop notices the request between cycles; a cycle in progress always
/// runs to completion.
#[derive(Clone)]
pub struct LoopStopper {
    stop_tx: watch::Sender<bool>,
}

impl LoopStopper {
    /// Stop the loop.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }
}

/// Time left in the period after a cycle took `elapsed`; zero on overrun.
pub const fn remaining_period(period: Duration, elapsed: Duration) -> Duration {
    period.saturating_sub(elapsed)
}

fn log_report(report: &CycleReport) {
    match &report.action {
        CycleAction::Idle => debug!(desired = report.desired, "Nothing to do"),
        CycleAction::Started { tickets } => info!(
            desired = report.desired,
            started = tickets.len(),
            owned = report.owned_after,
            "Cycle complete"
        ),
        CycleAction::Stopped { requested, outcome } => info!(
            desired = report.desired,
            requested,
            stopped = outcome.stopped_count(),
            skipped = outcome.skipped_count(),
            owned = report.owned_after,
            "Cycle complete"
        ),
    }
}
