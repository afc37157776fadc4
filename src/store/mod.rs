//! Tenant and message persistence.
//!
//! The routing core never calls into this layer; only the control-plane
//! endpoints do.

mod memory;

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{Message, Tenant, TenantId};

pub use memory::MemoryStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("tenant not found: {0}")]
    TenantNotFound(TenantId),

    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait TenantStore: Send + Sync {
    /// Create a tenant and its message partition.
    async fn create_tenant(&self, name: &str) -> StoreResult<Tenant>;
    async fn get_tenant(&self, tenant_id: TenantId) -> StoreResult<Tenant>;
    async fn list_tenants(&self) -> StoreResult<Vec<Tenant>>;
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn create_message(
        &self,
        tenant_id: TenantId,
        payload: serde_json::Value,
    ) -> StoreResult<Message>;
    async fn messages_by_tenant(&self, tenant_id: TenantId) -> StoreResult<Vec<Message>>;
}
