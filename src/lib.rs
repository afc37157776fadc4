//! Tenant Router Library
//!
//! Routes per-tenant messages from a shared RabbitMQ broker into isolated,
//! resizable worker pools, one pool per tenant, with coordinated shutdown.

pub mod api;
pub mod consumer;
pub mod messaging;
pub mod store;
pub mod transmitter;
pub mod types;

#[cfg(test)]
mod test_support;

pub use consumer::{ConsumerError, ConsumerManager};
pub use messaging::{Broker, BrokerChannel, BrokerError, MemoryBroker, RabbitBroker};
pub use transmitter::{
    EnqueueOutcome, SimulatedProcessor, TaskProcessor, TransmitterError, TransmitterManager,
};
pub use types::{RouterConfig, TenantId};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::consumer::*;
    pub use crate::messaging::{queue_name, Broker, BrokerChannel, Delivery};
    pub use crate::transmitter::*;
    pub use crate::types::*;
}

/// Workers started for a newly created tenant
pub const DEFAULT_WORKER_COUNT: usize = 5;

/// Capacity of each tenant's task buffer
pub const TASK_BUFFER_CAPACITY: usize = 100;

/// Prefix of every tenant queue name
pub const QUEUE_PREFIX: &str = "tenant_";

/// Simulated processing latency per payload (ms)
pub const DEFAULT_PROCESSING_DELAY_MS: u64 = 100;

/// Prefix of configuration environment variables
pub const ENV_PREFIX: &str = "ROUTER";
