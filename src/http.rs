//! Status HTTP surface.
//!
//! Runs on a separate tokio task when `[server] status_port` is nonzero and
//! serves a service banner, a liveness probe, and a small stats document.

use crate::state::Hub;
use axum::extract::State;
use axum::{Json, Router, routing::get};
use std::net::SocketAddr;
use std::sync::Arc;

async fn root_handler(State(hub): State<Arc<Hub>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "service": hub.server_name,
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
        "active_connections": hub.registry.connection_count(),
    }))
}

async fn health_handler(State(hub): State<Arc<Hub>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "active_connections": hub.registry.connection_count(),
        "timestamp": crate::proto::now_rfc3339(),
    }))
}

async fn stats_handler(State(hub): State<Arc<Hub>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "connections": hub.registry.connection_count(),
        "scopes": hub.registry.scope_count(),
        "history_len": hub.history.len().await,
    }))
}

/// Run the status HTTP server.
///
/// Binds to `0.0.0.0:port`. This is a long-running task that should be
/// spawned in the background.
pub async fn run_status_server(hub: Arc<Hub>, port: u16) {
    let app = Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .with_state(hub);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("status HTTP server listening on {}", addr);

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("failed to bind status server on {}: {}", addr, e);
            return;
        }
    };

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("status server error: {}", e);
    }
}
