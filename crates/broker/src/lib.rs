#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

//! # spawner-broker
//!
//! Client for the ticket broker that owns agent resources.
//!
//! The broker hands out *tickets*: a ticket is requested for a set of tags,
//! becomes ready once a resource is assigned to it, and is closed when the
//! resource is no longer needed. Calls are XML-RPC over HTTP. This crate only speaks the protocol; it keeps
//! no state about which tickets anybody owns.
//!
//! ## Example
//!
//! ```ignore
//! use spawner_broker::{BrokerClient, BrokerConfig};
//!
//! let client = BrokerClient::with_config(BrokerConfig::with_url("http://localhost:49100"))?;
//! let id = client.new_ticket(&["arch_x86_64".to_string()]).await?;
//! let payload = client.wait(&id).await?;
//! println!("got resource: {payload}");
//! client.close(&id).await?;
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod types;
pub mod xmlrpc;

pub use client::BrokerClient;
pub use config::BrokerConfig;
pub use error::{Error, Result};
pub use types::{Collected, ResourcePayload, TicketId};
