//! Web server setup and routing

use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::api;
use crate::state::AppState;
use crate::ws;

/// Build the API router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        // API routes
        .route("/api/scan", get(api::get_scan).post(api::start_scan))
        .route("/api/scan/cancel", post(api::cancel_scan))
        .route("/api/devices", get(api::list_devices))
        .route("/api/devices/{ip}", get(api::get_device))
        .route("/api/subnet", get(api::get_subnet).post(api::update_subnet))
        .route("/api/interfaces", get(api::list_interfaces))
        .route("/api/config", get(api::get_config))
        // WebSocket for real-time updates
        .route("/ws", get(ws::websocket_handler))
        // CORS
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Run the web server
pub async fn run(state: Arc<AppState>, bind: &str) -> Result<()> {
    if state.config.daemon.scan_on_start {
        match state.scanner.start_scan(None).await {
            Ok(session) => info!(session = %session.id, "Started initial scan"),
            Err(e) => warn!(error = %e, "Initial scan not started"),
        }
    }

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(address = %bind, "Starting web server");
    axum::serve(listener, app).await?;
    Ok(())
}
