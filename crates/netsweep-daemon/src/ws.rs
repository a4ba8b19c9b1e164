//! WebSocket handler for real-time updates

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use netsweep_core::{ScanSession, ScanSnapshot};
use netsweep_discovery::{DiscoveryChannel, DiscoveryEvent};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::state::{AppState, DeviceView};

/// WebSocket message types
#[derive(Serialize)]
#[serde(tag = "type", content = "data")]
enum WsMessage {
    #[serde(rename = "snapshot")]
    Snapshot(ScanSnapshot),
    #[serde(rename = "scan_started")]
    ScanStarted(ScanSession),
    #[serde(rename = "progress")]
    Progress { completed: usize, total: usize },
    #[serde(rename = "devices_updated")]
    DevicesUpdated(Vec<DeviceView>),
    #[serde(rename = "channel_failed")]
    ChannelFailed {
        channel: DiscoveryChannel,
        error: String,
    },
    #[serde(rename = "scan_completed")]
    ScanCompleted {
        generation: u64,
        devices: usize,
        duration_secs: f64,
    },
    #[serde(rename = "scan_cancelled")]
    ScanCancelled { generation: u64 },
    #[serde(rename = "pong")]
    Pong,
}

impl From<DiscoveryEvent> for WsMessage {
    fn from(event: DiscoveryEvent) -> Self {
        match event {
            DiscoveryEvent::ScanStarted(session) => Self::ScanStarted(session),
            DiscoveryEvent::Progress { completed, total } => Self::Progress { completed, total },
            DiscoveryEvent::DevicesUpdated(devices) => {
                Self::DevicesUpdated(devices.into_iter().map(DeviceView::from).collect())
            }
            DiscoveryEvent::ChannelFailed { channel, error } => {
                Self::ChannelFailed { channel, error }
            }
            DiscoveryEvent::ScanCompleted {
                generation,
                devices,
                duration_secs,
            } => Self::ScanCompleted {
                generation,
                devices,
                duration_secs,
            },
            DiscoveryEvent::ScanCancelled { generation } => Self::ScanCancelled { generation },
        }
    }
}

/// WebSocket upgrade handler
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut discovery_events = state.subscribe();

    info!("WebSocket client connected");

    // Send current state on connect
    let snapshot = WsMessage::Snapshot(state.scanner.snapshot().await);
    if let Ok(json) = serde_json::to_string(&snapshot) {
        if sender.send(Message::Text(json.into())).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            // Forward discovery events to client
            event = discovery_events.recv() => {
                match event {
                    Ok(event) => {
                        if let Ok(json) = serde_json::to_string(&WsMessage::from(event)) {
                            if sender.send(Message::Text(json.into())).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        debug!(skipped = n, "Discovery event channel lagged");
                    }
                    Err(RecvError::Closed) => {
                        debug!("Discovery event channel closed");
                        break;
                    }
                }
            }

            // Handle incoming messages from client
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Text(text))) => {
                        if text.as_str() == "ping" {
                            let Ok(pong) = serde_json::to_string(&WsMessage::Pong) else {
                                continue;
                            };
                            if sender.send(Message::Text(pong.into())).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    info!("WebSocket client disconnected");
}
