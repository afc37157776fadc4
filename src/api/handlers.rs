//! HTTP request handlers for the control plane.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use tracing::{error, info, warn};

use crate::consumer::ConsumerManager;
use crate::store::{MessageStore, StoreError, TenantStore};
use crate::types::{
    CreateTenantRequest, Message, MessagesQuery, PostMessageRequest, TenantId, TenantResponse,
    TenantStatusResponse, UpdateConcurrencyRequest,
};

/// Application state shared across handlers.
pub struct AppState {
    pub tenants: Arc<dyn TenantStore>,
    pub messages: Arc<dyn MessageStore>,
    pub consumers: Arc<ConsumerManager>,
}

/// Error response with a `{"error": ...}` body.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

fn parse_tenant_id(raw: &str, what: &str) -> Result<TenantId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::bad_request(format!("invalid {}", what)))
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: String,
    version: String,
}

/// Health check endpoint.
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Create a tenant and start routing its queue.
///
/// A consumer that fails to start is logged; the tenant is still created.
pub async fn create_tenant(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CreateTenantRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<TenantResponse>), ApiError> {
    let Json(request) = payload.map_err(|_| ApiError::bad_request("invalid JSON body"))?;

    if request.name.trim().is_empty() {
        return Err(ApiError::bad_request("name is required"));
    }

    let tenant = state.tenants.create_tenant(&request.name).await.map_err(|e| {
        error!(error = %e, "Failed to create tenant");
        ApiError::internal(e.to_string())
    })?;

    if let Err(e) = state.consumers.start_consumer(tenant.id).await {
        warn!(tenant_id = %tenant.id, error = %e, "Failed to start consumer for tenant");
    }

    info!(tenant_id = %tenant.id, name = %tenant.name, "Tenant created");
    Ok((StatusCode::CREATED, Json(tenant.into())))
}

/// List registered tenants, oldest first.
pub async fn list_tenants(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<TenantResponse>>, ApiError> {
    let tenants = state.tenants.list_tenants().await.map_err(|e| {
        error!(error = %e, "Failed to list tenants");
        ApiError::internal("could not list tenants")
    })?;

    Ok(Json(tenants.into_iter().map(Into::into).collect()))
}

/// Fetch a tenant and whether it is currently routed.
pub async fn get_tenant(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<TenantStatusResponse>, ApiError> {
    let tenant_id = parse_tenant_id(&id, "tenant ID")?;

    let tenant = state
        .tenants
        .get_tenant(tenant_id)
        .await
        .map_err(|e| match e {
            StoreError::TenantNotFound(_) => ApiError::not_found("tenant not found"),
            e => {
                error!(tenant_id = %tenant_id, error = %e, "Failed to fetch tenant");
                ApiError::internal("could not fetch tenant")
            }
        })?;

    Ok(Json(TenantStatusResponse {
        tenant: tenant.into(),
        running: state.consumers.is_running(tenant_id).await,
        workers: state.consumers.transmitters().worker_count(tenant_id).await,
    }))
}

/// Stop routing a tenant and delete its queue.
pub async fn delete_tenant(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let tenant_id = parse_tenant_id(&id, "tenant ID")?;

    state.consumers.stop_consumer(tenant_id).await.map_err(|e| {
        error!(tenant_id = %tenant_id, error = %e, "Failed to stop consumer");
        ApiError::internal("failed to stop consumer")
    })?;

    Ok(StatusCode::NO_CONTENT)
}

/// Resize a tenant's worker pool.
pub async fn update_concurrency(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    payload: Result<Json<UpdateConcurrencyRequest>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let tenant_id = parse_tenant_id(&id, "tenant ID")?;

    let workers = match payload {
        Ok(Json(request)) if request.workers > 0 => request.workers as usize,
        _ => return Err(ApiError::bad_request("invalid workers value")),
    };

    state
        .consumers
        .update_concurrency(tenant_id, workers)
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?;

    Ok(StatusCode::OK)
}

/// Store a message in the tenant's partition.
pub async fn post_message(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<PostMessageRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let Json(request) = payload.map_err(|_| ApiError::bad_request("invalid JSON"))?;
    let tenant_id = parse_tenant_id(&request.tenant_id, "tenant_id")?;

    state
        .messages
        .create_message(tenant_id, request.payload)
        .await
        .map_err(|e| {
            error!(tenant_id = %tenant_id, error = %e, "Failed to insert message");
            ApiError::internal("failed to insert message")
        })?;

    Ok((StatusCode::CREATED, Json(json!({ "status": "ok" }))))
}

/// List a tenant's stored messages.
pub async fn get_messages(
    State(state): State<Arc<AppState>>,
    Query(query): Query<MessagesQuery>,
) -> Result<Json<Vec<Message>>, ApiError> {
    let raw = query
        .tenant_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ApiError::bad_request("tenant_id is required"))?;
    let tenant_id = parse_tenant_id(&raw, "tenant_id")?;

    let messages = state
        .messages
        .messages_by_tenant(tenant_id)
        .await
        .map_err(|e| {
            error!(tenant_id = %tenant_id, error = %e, "Failed to fetch messages");
            ApiError::internal("could not fetch messages")
        })?;

    Ok(Json(messages))
}
