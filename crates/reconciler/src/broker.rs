//! Seam between the pool and the ticket broker.

use async_trait::async_trait;
use spawner_broker::{BrokerClient, Collected, ResourcePayload, TicketId};

use crate::error::Result;

/// Operations the pool needs from the ticket broker.
///
/// Every call may block for as long as the broker takes.
#[async_trait]
pub trait TicketBroker: Send + Sync {
    /// Request a ticket for `tags`; returns before a resource is assigned.
    async fn new_ticket(&self, tags: &[String]) -> Result<TicketId>;

    /// Block until the ticket has a resource and return its payload.
    async fn wait(&self, id: &TicketId) -> Result<ResourcePayload>;

    /// Current state of an existing ticket.
    async fn collect(&self, id: &TicketId) -> Result<Collected>;

    /// Give the ticket back to the broker.
    async fn close(&self, id: &TicketId) -> Result<()>;
}

#[async_trait]
impl TicketBroker for BrokerClient {
    async fn new_ticket(&self, tags: &[String]) -> Result<TicketId> {
        Ok(Self::new_ticket(self, tags).await?)
    }

    async fn wait(&self, id: &TicketId) -> Result<ResourcePayload> {
        Ok(Self::wait(self, id).await?)
    }

    async fn collect(&self, id: &TicketId) -> Result<Collected> {
        Ok(Self::collect(self, id).await?)
    }

    async fn close(&self, id: &TicketId) -> Result<()> {
        Ok(Self::close(self, id).await?)
    }
}
