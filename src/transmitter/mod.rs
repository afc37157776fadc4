//! Per-tenant task buffers and resizable worker pools.

mod cancel;
mod manager;
mod tracker;
mod worker;

use thiserror::Error;

use crate::types::TenantId;

pub use cancel::{CancelHandle, CancelToken};
pub use manager::{EnqueueOutcome, TransmitterManager};
pub use tracker::{WorkerGuard, WorkerTracker};
pub use worker::{SimulatedProcessor, TaskProcessor};

/// Errors returned by the transmitter registry.
#[derive(Debug, Error)]
pub enum TransmitterError {
    #[error("transmitter already exists for tenant {tenant_id}")]
    AlreadyExists { tenant_id: TenantId },
}
