//! REST API handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use netsweep_core::SubnetPrefix;
use netsweep_discovery::interface::{is_scannable, list_ipv4_addrs};
use netsweep_discovery::ScanError;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::{info, warn};

use crate::state::{AppState, DeviceView};

/// API error response
#[derive(Serialize)]
struct ApiError {
    error: String,
}

impl ApiError {
    fn new(msg: impl Into<String>) -> Self {
        Self { error: msg.into() }
    }
}

fn error_response(status: StatusCode, msg: impl Into<String>) -> axum::response::Response {
    (status, Json(ApiError::new(msg))).into_response()
}

/// Current scan state and published devices
pub async fn get_scan(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.scanner.snapshot().await)
}

/// Optional per-scan subnet override
#[derive(Deserialize)]
pub struct StartScanParams {
    pub prefix: Option<String>,
}

/// Start a scan, superseding any scan in progress
pub async fn start_scan(
    State(state): State<Arc<AppState>>,
    Query(params): Query<StartScanParams>,
) -> impl IntoResponse {
    let prefix = match params.prefix.as_deref().map(str::parse::<SubnetPrefix>) {
        Some(Ok(prefix)) => Some(prefix),
        Some(Err(e)) => return error_response(StatusCode::BAD_REQUEST, e.to_string()),
        None => None,
    };

    info!(prefix = ?prefix, "Scan requested");

    match state.scanner.start_scan(prefix).await {
        Ok(session) => (StatusCode::ACCEPTED, Json(session)).into_response(),
        Err(e @ ScanError::NoSubnet(_)) => {
            warn!(error = %e, "Cannot start scan");
            error_response(StatusCode::UNPROCESSABLE_ENTITY, e.to_string())
        }
        Err(e @ ScanError::InvalidConfig(_)) => {
            warn!(error = %e, "Cannot start scan");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

/// Cancel the running scan
pub async fn cancel_scan(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.scanner.cancel_scan().await)
}

/// List all published devices
pub async fn list_devices(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.devices().await)
}

/// Get a specific device by address
pub async fn get_device(
    State(state): State<Arc<AppState>>,
    Path(ip): Path<String>,
) -> impl IntoResponse {
    let ip: Ipv4Addr = match ip.parse() {
        Ok(ip) => ip,
        Err(_) => return error_response(StatusCode::BAD_REQUEST, "Invalid IPv4 address"),
    };

    match state.scanner.get_device(ip).await {
        Some(device) => Json(DeviceView::from(device)).into_response(),
        None => error_response(StatusCode::NOT_FOUND, "Device not found"),
    }
}

/// Local subnet info for the UI
#[derive(Serialize)]
pub struct SubnetInfo {
    pub interface: String,
    pub ip: Ipv4Addr,
    pub prefix: SubnetPrefix,
    pub prefix_len: Option<u8>,
}

/// The local subnet scans would cover
pub async fn get_subnet(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let config = state.scanner.get_config().await;

    match state.scanner.local_subnet().await {
        Ok(subnet) => Json(SubnetInfo {
            prefix: config.subnet_prefix.unwrap_or_else(|| subnet.prefix()),
            prefix_len: subnet.prefix_len(),
            interface: subnet.interface,
            ip: subnet.ip,
        })
        .into_response(),
        Err(e) => error_response(StatusCode::NOT_FOUND, e.to_string()),
    }
}

/// Request to pin or unpin the scan subnet
#[derive(Deserialize)]
pub struct UpdateSubnetRequest {
    /// Prefix such as "192.168.1"; `null` follows the local interface again
    pub prefix: Option<String>,
}

/// Update the scan subnet configuration
pub async fn update_subnet(
    State(state): State<Arc<AppState>>,
    Json(req): Json<UpdateSubnetRequest>,
) -> impl IntoResponse {
    let prefix = match req.prefix.as_deref().map(str::parse::<SubnetPrefix>) {
        Some(Ok(prefix)) => Some(prefix),
        Some(Err(e)) => return error_response(StatusCode::BAD_REQUEST, e.to_string()),
        None => None,
    };

    state.scanner.update_subnet_prefix(prefix).await;

    Json(serde_json::json!({
        "status": "updated",
        "prefix": prefix,
    }))
    .into_response()
}

/// Network interface info for the UI
#[derive(Serialize)]
pub struct InterfaceInfo {
    pub name: String,
    pub ip: Ipv4Addr,
    pub prefix: SubnetPrefix,
    pub prefix_len: Option<u8>,
}

/// List interfaces a scan could use
pub async fn list_interfaces() -> impl IntoResponse {
    match list_ipv4_addrs() {
        Ok(addrs) => {
            let interfaces: Vec<InterfaceInfo> = addrs
                .into_iter()
                .filter(is_scannable)
                .map(|addr| InterfaceInfo {
                    prefix: SubnetPrefix::of(addr.ip),
                    prefix_len: addr.netmask.map(|m| u32::from(m).count_ones() as u8),
                    name: addr.name,
                    ip: addr.ip,
                })
                .collect();
            Json(interfaces).into_response()
        }
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// Get current configuration
pub async fn get_config(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "daemon": state.config.daemon,
        "scanner": state.scanner.get_config().await,
    }))
}
