//! Message records and message endpoint payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::TenantId;

/// A message persisted for a tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique identifier for this message
    pub id: Uuid,

    /// Tenant partition the message belongs to
    pub tenant_id: TenantId,

    /// Arbitrary JSON payload as submitted
    pub payload: serde_json::Value,

    /// When the message was stored
    pub created_at: DateTime<Utc>,
}

/// Request to store a message.
///
/// The tenant id arrives as a string so that malformed ids can be reported
/// with a specific error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostMessageRequest {
    #[serde(default)]
    pub tenant_id: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Query string for listing messages.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessagesQuery {
    pub tenant_id: Option<String>,
}
