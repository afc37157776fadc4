//! # Broker Messaging Module
//!
//! Boundary between the routing core and the shared message broker.
//!
//! ## Features
//! - `Broker` / `BrokerChannel` traits covering exactly the operations the
//!   consumer manager needs: open a channel, declare a durable queue, consume
//!   with auto-ack, delete a queue
//! - RabbitMQ implementation on top of a pooled AMQP connection
//! - In-process implementation for local development and tests

pub mod memory;
pub mod rabbit_client;

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

use crate::types::TenantId;
use crate::QUEUE_PREFIX;

pub use memory::MemoryBroker;
pub use rabbit_client::{RabbitBroker, RabbitConfig};

/// Errors reported by a broker implementation.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("connection pool error: {0}")]
    Pool(String),

    #[error("amqp error: {0}")]
    Amqp(#[from] lapin::Error),

    #[error("queue not found: {0}")]
    QueueNotFound(String),

    #[error("queue {0} already has a consumer")]
    AlreadyConsuming(String),

    #[error("broker unavailable: {0}")]
    Unavailable(String),
}

/// A single message read from a tenant queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub body: Vec<u8>,
}

/// Stream of deliveries from one queue. Ends when the queue goes away.
pub type DeliveryStream = BoxStream<'static, Result<Delivery, BrokerError>>;

/// A connection to the shared broker.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Open a fresh channel on the shared connection.
    async fn open_channel(&self) -> Result<Box<dyn BrokerChannel>, BrokerError>;
}

/// A broker channel. Callers must `close` it on every exit path.
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    /// Declare a durable, non-exclusive, non-auto-delete queue.
    async fn declare_durable_queue(&self, name: &str) -> Result<(), BrokerError>;

    /// Start consuming with broker-side auto-acknowledgement.
    async fn consume(&self, name: &str) -> Result<DeliveryStream, BrokerError>;

    /// Delete a queue regardless of consumers or pending messages.
    async fn delete_queue(&self, name: &str) -> Result<(), BrokerError>;

    /// Release the channel.
    async fn close(self: Box<Self>);
}

/// Queue name for a tenant. Declare and delete both address this name.
pub fn queue_name(tenant_id: TenantId) -> String {
    format!("{}{}", QUEUE_PREFIX, tenant_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_queue_name_is_deterministic() {
        let id = TenantId::from(
            Uuid::parse_str("0d4e5b6a-1111-4222-8333-944455556666").unwrap(),
        );
        assert_eq!(queue_name(id), "tenant_0d4e5b6a-1111-4222-8333-944455556666");
        assert_eq!(queue_name(id), queue_name(id));
    }
}
