//! WebSocket signaling endpoint
//!
//! `GET /api/ws?viewer_id=...` upgrades to a socket that carries JSON
//! [`SignalingMessage`]s in both directions. System events are pushed to
//! every socket. Closing the socket reports the viewer as disconnected.

use async_trait::async_trait;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{AppError, Result};
use crate::events::SystemEvent;
use crate::state::AppState;
use crate::webrtc::signaling::{SignalingChannel, SignalingError, SignalingMessage};

/// Upper bound of the ping interval
const MAX_HEARTBEAT_SECS: u64 = 30;

/// Ping often enough that a pong lands well inside the stale timeout
fn heartbeat_period(stale_timeout: Duration) -> Duration {
    (stale_timeout / 3).clamp(
        Duration::from_secs(1),
        Duration::from_secs(MAX_HEARTBEAT_SECS),
    )
}

struct Connection {
    id: u64,
    tx: mpsc::UnboundedSender<String>,
}

/// Registry of connected viewer sockets
pub struct SignalingHub {
    connections: RwLock<HashMap<String, Connection>>,
    next_id: AtomicU64,
    disconnect_tx: mpsc::UnboundedSender<String>,
}

impl SignalingHub {
    /// Create the hub and the stream of disconnected viewer ids
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (disconnect_tx, disconnect_rx) = mpsc::unbounded_channel();
        let hub = Self {
            connections: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            disconnect_tx,
        };
        (hub, disconnect_rx)
    }

    /// Attach a socket for a viewer; a previous socket of the same viewer
    /// stops receiving messages
    pub fn register(&self, viewer_id: &str) -> (u64, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let previous = self
            .connections
            .write()
            .insert(viewer_id.to_string(), Connection { id, tx });
        if previous.is_some() {
            info!("Viewer {} reconnected, replacing its socket", viewer_id);
        }
        (id, rx)
    }

    /// Detach a socket; reports a disconnect only if it was still current
    pub fn unregister(&self, viewer_id: &str, connection_id: u64) {
        let removed = {
            let mut connections = self.connections.write();
            match connections.get(viewer_id) {
                Some(conn) if conn.id == connection_id => connections.remove(viewer_id),
                _ => None,
            }
        };
        if removed.is_some() {
            let _ = self.disconnect_tx.send(viewer_id.to_string());
        }
    }

    pub fn is_connected(&self, viewer_id: &str) -> bool {
        self.connections.read().contains_key(viewer_id)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.read().len()
    }
}

#[async_trait]
impl SignalingChannel for SignalingHub {
    async fn send(&self, viewer_id: &str, message: SignalingMessage) -> Result<()> {
        let json = serde_json::to_string(&message)?;
        let connections = self.connections.read();
        let conn = connections
            .get(viewer_id)
            .ok_or_else(|| AppError::NotFound(format!("viewer {} not connected", viewer_id)))?;
        conn.tx
            .send(json)
            .map_err(|_| AppError::NotFound(format!("viewer {} not connected", viewer_id)))
    }

    async fn broadcast(&self, event: SystemEvent) {
        let json = match serde_json::to_string(&event) {
            Ok(json) => json,
            Err(e) => {
                warn!("Failed to serialize event {}: {}", event.event_name(), e);
                return;
            }
        };
        for conn in self.connections.read().values() {
            let _ = conn.tx.send(json.clone());
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub viewer_id: Option<String>,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let viewer_id = params
        .viewer_id
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    ws.on_upgrade(move |socket| handle_socket(socket, state, viewer_id))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, viewer_id: String) {
    let (mut sender, mut receiver) = socket.split();
    let (connection_id, mut outgoing) = state.signaling.register(&viewer_id);
    info!("Signaling socket connected for viewer {}", viewer_id);

    let mut heartbeat_interval =
        tokio::time::interval(heartbeat_period(state.peers.settings().stale_timeout));

    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<SignalingMessage>(&text) {
                            Ok(message) => state.peers.handle_signal(&viewer_id, message).await,
                            Err(e) => {
                                debug!("Malformed signaling message from {}: {}", viewer_id, e);
                                let err = AppError::BadRequest(format!("malformed message: {}", e));
                                let reply = SignalingMessage::Error(SignalingError::from(&err));
                                if let Ok(json) = serde_json::to_string(&reply) {
                                    if sender.send(Message::Text(json)).await.is_err() {
                                        break;
                                    }
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        let _ = state.peers.keepalive(&viewer_id);
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("Signaling socket of {} closed", viewer_id);
                        break;
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket receive error for {}: {}", viewer_id, e);
                        break;
                    }
                    _ => {}
                }
            }

            out = outgoing.recv() => {
                match out {
                    Some(json) => {
                        if sender.send(Message::Text(json)).await.is_err() {
                            warn!("Failed to send to {}, disconnecting", viewer_id);
                            break;
                        }
                    }
                    // replaced by a newer socket of the same viewer
                    None => break,
                }
            }

            _ = heartbeat_interval.tick() => {
                if sender.send(Message::Ping(vec![])).await.is_err() {
                    warn!("Failed to send ping to {}, disconnecting", viewer_id);
                    break;
                }
            }
        }
    }

    state.signaling.unregister(&viewer_id, connection_id);
}
