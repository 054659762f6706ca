//! Reconciliation loop that keeps a pool of broker-backed agents at the size
//! an external hook asks for.
//!
//! Every period the loop:
//! 1. Runs the `converge-to` hook to learn the desired count
//! 2. Compares it with the tickets it currently owns
//! 3. Starts new tickets, or releases and closes old ones, to close the gap
//! 4. Sleeps for whatever is left of the period
//!
//! Starting is fail-fast: a resource that cannot be taken ends the loop.
//! Stopping is best-effort: a resource whose release hook fails stays owned
//! and is tried again in a later cycle.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use spawner_broker::BrokerClient;
//! use spawner_reconciler::{HookPaths, HookRunner, LoopConfig, ReconcileLoop, ResourcePoolBuilder};
//!
//! #[tokio::main]
//! async fn main() -> spawner_reconciler::Result<()> {
//!     let pool = ResourcePoolBuilder::new()
//!         .with_broker(Arc::new(BrokerClient::new()?))
//!         .with_hooks(HookRunner::with_processes(HookPaths::default(), None))
//!         .tag("arch_x86_64")
//!         .build()?;
//!
//!     let mut reconcile = ReconcileLoop::new(pool, LoopConfig::default());
//!     reconcile.run().await
//! }
//! ```

#![forbid(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod broker;
pub mod config;
pub mod error;
pub mod hooks;
pub mod r#loop;
pub mod pool;
pub mod types;

#[cfg(test)]
mod testing;

pub use broker::TicketBroker;
pub use config::{HookPaths, SpawnerConfig, parse_tags};
pub use error::{Error, Result};
pub use hooks::{CommandOutput, CommandRunner, HookRunner, ProcessRunner};
pub use r#loop::{LoopConfig, LoopStopper, ReconcileLoop, remaining_period};
pub use pool::{ResourcePool, ResourcePoolBuilder};
pub use types::{CycleAction, CycleReport, OwnedTicketSet, SkipReason, StopOutcome, drift};
