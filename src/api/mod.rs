//! Control-plane HTTP API.

pub mod handlers;

use std::sync::Arc;

use axum::{
    routing::{delete, get, post, put},
    Router,
};

pub use handlers::{ApiError, AppState};

/// Build the control-plane routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Tenants
        .route(
            "/tenants",
            post(handlers::create_tenant).get(handlers::list_tenants),
        )
        .route(
            "/tenants/:id",
            get(handlers::get_tenant).delete(handlers::delete_tenant),
        )
        .route(
            "/tenants/:id/config/concurrency",
            put(handlers::update_concurrency),
        )
        // Messages
        .route(
            "/messages",
            post(handlers::post_message).get(handlers::get_messages),
        )
        .with_state(state)
}
