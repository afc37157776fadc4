//! Core types for the routing service.

mod config;
mod message;
mod tenant;

pub use config::{ConfigError, LogFormat, RouterConfig};
pub use message::{Message, MessagesQuery, PostMessageRequest};
pub use tenant::{
    CreateTenantRequest, Tenant, TenantId, TenantResponse, TenantStatusResponse,
    UpdateConcurrencyRequest,
};
