//! Tenant identity and tenant request/response definitions.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of an isolated routing unit.
///
/// Every per-tenant registry entry (consumer, transmitter, message partition)
/// is keyed by this value. Its `Display` form is the canonical hyphenated UUID,
/// which is also what broker queue names are derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(Uuid);

impl TenantId {
    /// Generate a fresh random tenant id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

}

impl Default for TenantId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.hyphenated().fmt(f)
    }
}

impl FromStr for TenantId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl From<Uuid> for TenantId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// A registered tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: TenantId,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// Request to create a tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTenantRequest {
    #[serde(default)]
    pub name: String,
}

/// Response returned after a tenant is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantResponse {
    pub id: TenantId,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl From<Tenant> for TenantResponse {
    fn from(tenant: Tenant) -> Self {
        Self {
            id: tenant.id,
            name: tenant.name,
            created_at: tenant.created_at,
        }
    }
}

/// A tenant together with its routing state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantStatusResponse {
    #[serde(flatten)]
    pub tenant: TenantResponse,
    pub running: bool,
    /// Worker count of the current generation, absent when no transmitter runs.
    pub workers: Option<usize>,
}

/// Request to resize a tenant's worker pool.
///
/// Signed so that negative values reach validation instead of failing
/// deserialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateConcurrencyRequest {
    pub workers: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_is_canonical_uuid() {
        let uuid = Uuid::parse_str("6f1c2a9e-0b7d-4c1e-9a55-3d2f8e7b1c40").unwrap();
        let tenant = TenantId::from(uuid);
        assert_eq!(tenant.to_string(), "6f1c2a9e-0b7d-4c1e-9a55-3d2f8e7b1c40");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("not-a-tenant".parse::<TenantId>().is_err());
        assert!("6f1c2a9e-0b7d-4c1e-9a55-3d2f8e7b1c40".parse::<TenantId>().is_ok());
    }

    #[test]
    fn test_serializes_as_plain_string() {
        let tenant = TenantId::new();
        let json = serde_json::to_string(&tenant).unwrap();
        assert_eq!(json, format!("\"{}\"", tenant));
    }
}
