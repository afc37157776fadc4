//! Per-tenant broker consumers.

mod manager;

use thiserror::Error;

use crate::messaging::BrokerError;
use crate::transmitter::TransmitterError;

pub use manager::ConsumerManager;

/// Setup and teardown failures surfaced by the consumer registry.
#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("failed to open channel: {0}")]
    Channel(#[source] BrokerError),

    #[error("failed to declare queue: {0}")]
    Declare(#[source] BrokerError),

    #[error("failed to start transmitter: {0}")]
    TransmitterStart(#[from] TransmitterError),

    #[error("failed to delete queue: {0}")]
    Delete(#[source] BrokerError),
}
