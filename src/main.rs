//! Tenant Router - Main Entry Point
//!
//! Serves the control plane and routes tenant queues into worker pools.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tenant_router::api::{build_router, AppState};
use tenant_router::messaging::{RabbitBroker, RabbitConfig};
use tenant_router::store::MemoryStore;
use tenant_router::types::{LogFormat, RouterConfig};
use tenant_router::{ConsumerManager, SimulatedProcessor, TaskProcessor, TransmitterManager};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    dotenvy::dotenv().ok();
    let config = RouterConfig::from_env().context("failed to load configuration")?;

    init_tracing(config.log_format);

    info!("Starting Tenant Router v{}", env!("CARGO_PKG_VERSION"));
    info!(
        default_workers = config.default_workers,
        buffer_capacity = config.task_buffer_capacity,
        "Worker pool defaults"
    );

    // Initialize components
    let broker = Arc::new(RabbitBroker::new(RabbitConfig {
        uri: config.amqp_uri.clone(),
        pool_size: config.amqp_pool_size,
    })?);
    broker
        .ping()
        .await
        .with_context(|| format!("failed to connect to RabbitMQ at {}", broker.uri()))?;

    let processor: Arc<dyn TaskProcessor> = Arc::new(SimulatedProcessor::new(
        Duration::from_millis(config.processing_delay_ms),
    ));
    let transmitters = Arc::new(TransmitterManager::with_capacity(
        processor,
        config.task_buffer_capacity,
    ));
    let consumers = Arc::new(ConsumerManager::new(
        broker.clone(),
        Arc::clone(&transmitters),
        config.default_workers,
    ));
    let store = Arc::new(MemoryStore::new());

    let state = Arc::new(AppState {
        tenants: store.clone(),
        messages: store.clone(),
        consumers: Arc::clone(&consumers),
    });

    // Build HTTP routes
    let app = build_router(state).layer(TraceLayer::new_for_http());

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    info!("Listening on http://{}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // The server no longer accepts requests; tear down tenants.
    info!("HTTP server stopped, stopping consumers");
    consumers.stop_all_consumers().await;
    transmitters.shutdown_and_wait().await;

    drop(consumers);
    drop(broker);
    drop(store);

    info!("Tenant Router stopped");
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "tenant_router=info,tower_http=debug".into()),
    );

    match format {
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C");
        },
        _ = terminate => {
            info!("Received SIGTERM");
        },
    }
}
