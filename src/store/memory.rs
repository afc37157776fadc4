//! In-memory store for tenants and per-tenant message partitions.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use super::{MessageStore, StoreError, StoreResult, TenantStore};
use crate::types::{Message, Tenant, TenantId};

/// Non-durable store. Each tenant owns a separate message partition.
#[derive(Default)]
pub struct MemoryStore {
    tenants: RwLock<HashMap<TenantId, Tenant>>,
    partitions: RwLock<HashMap<TenantId, Vec<Message>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored messages across all partitions.
    pub async fn message_count(&self) -> usize {
        self.partitions.read().await.values().map(Vec::len).sum()
    }
}

#[async_trait]
impl TenantStore for MemoryStore {
    async fn create_tenant(&self, name: &str) -> StoreResult<Tenant> {
        let tenant = Tenant {
            id: TenantId::new(),
            name: name.to_string(),
            created_at: Utc::now(),
        };

        self.tenants.write().await.insert(tenant.id, tenant.clone());
        self.partitions.write().await.entry(tenant.id).or_default();

        debug!(tenant_id = %tenant.id, "Created tenant partition");
        Ok(tenant)
    }

    async fn get_tenant(&self, tenant_id: TenantId) -> StoreResult<Tenant> {
        self.tenants
            .read()
            .await
            .get(&tenant_id)
            .cloned()
            .ok_or(StoreError::TenantNotFound(tenant_id))
    }

    async fn list_tenants(&self) -> StoreResult<Vec<Tenant>> {
        let mut tenants: Vec<Tenant> = self.tenants.read().await.values().cloned().collect();
        tenants.sort_by_key(|t| t.created_at);
        Ok(tenants)
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn create_message(
        &self,
        tenant_id: TenantId,
        payload: serde_json::Value,
    ) -> StoreResult<Message> {
        let message = Message {
            id: Uuid::new_v4(),
            tenant_id,
            payload,
            created_at: Utc::now(),
        };

        self.partitions
            .write()
            .await
            .entry(tenant_id)
            .or_default()
            .push(message.clone());

        Ok(message)
    }

    async fn messages_by_tenant(&self, tenant_id: TenantId) -> StoreResult<Vec<Message>> {
        Ok(self
            .partitions
            .read()
            .await
            .get(&tenant_id)
            .cloned()
            .unwrap_or_default())
    }
}
