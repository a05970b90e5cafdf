//! HTTP API gateway for PulseChat.
//!
//! Exposes the conversational endpoint, history fetch/clear, the latest
//! snapshot of a monitoring session, and a health check.
//!
//! Built on Axum.

pub mod api_v1;

use axum::extract::DefaultBodyLimit;
use axum::{Router, http::Method, response::Json, routing::get};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use pulsechat_chat::ChatEngine;
use pulsechat_config::AppConfig;
use pulsechat_core::EntityStore;
use pulsechat_storage::SqliteStore;

/// Shared application state for the gateway.
pub struct GatewayState {
    pub engine: Arc<ChatEngine>,
    pub store: Arc<dyn EntityStore>,
}

pub type SharedState = Arc<GatewayState>;

/// Build the full router: `/health` plus the v1 API nested under `/v1`.
///
/// Layers applied:
/// - CORS for GET/POST/DELETE from any origin
/// - Request body size limit (1 MB)
/// - HTTP trace logging
pub fn build_router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([axum::http::header::CONTENT_TYPE])
        .max_age(std::time::Duration::from_secs(3600));

    Router::new()
        .route("/health", get(health_handler))
        .nest("/v1", api_v1::v1_router(state))
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Start the gateway HTTP server.
///
/// Fails before binding when the configuration has no API key or the
/// database cannot be opened.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);

    let engine = Arc::new(ChatEngine::from_config(&config)?);
    let store = SqliteStore::new(&config.database.url, config.database.max_connections).await?;

    let state = Arc::new(GatewayState {
        engine,
        store: Arc::new(store),
    });
    let app = build_router(state);

    info!(addr = %addr, model = %config.provider.model, "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        // No signal handler available: run until the process is killed.
        std::future::pending::<()>().await;
    }
}

// --- Handlers ---

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}
