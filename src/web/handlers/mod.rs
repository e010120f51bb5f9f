pub mod devices;

pub use devices::*;

use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::device::{StreamRequest, StreamStatus};
use crate::error::{AppError, Result};
use crate::state::AppState;
use crate::webrtc::{
    AnswerResponse, IceCandidateRequest, IceServerInfo, OfferRequest, PeerSessionInfo,
};

/// Generic action response
#[derive(Debug, Serialize)]
pub struct ActionResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ActionResponse {
    fn ok() -> Self {
        Self {
            success: true,
            message: None,
        }
    }

    fn with_message(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
        }
    }
}

// ============================================================================
// Health
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub backend: &'static str,
    pub devices: usize,
    pub peer_sessions: usize,
    pub signaling_connections: usize,
}

/// GET /api/health
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        backend: state.registry.backend().name(),
        devices: state.registry.list_devices().len(),
        peer_sessions: state.peers.session_count(),
        signaling_connections: state.signaling.connection_count(),
    })
}

// ============================================================================
// Capture sessions
// ============================================================================

/// POST /api/devices/:device_id/stream/start
///
/// Starts (or joins) the device's capture session and keeps it alive
/// until it is stopped explicitly.
pub async fn stream_start(
    State(state): State<Arc<AppState>>,
    Path(device_id): Path<String>,
    Json(request): Json<StreamRequest>,
) -> Result<Json<StreamStatus>> {
    let session = state
        .capture
        .ensure_session(&device_id, &request, None)
        .await?;
    Ok(Json(session.status()))
}

#[derive(Debug, Serialize)]
pub struct StopResponse {
    pub device_id: String,
    /// Viewers cut off by the stop
    pub evicted: Vec<String>,
}

/// POST /api/devices/:device_id/stream/stop
pub async fn stream_stop(
    State(state): State<Arc<AppState>>,
    Path(device_id): Path<String>,
) -> Result<Json<StopResponse>> {
    let evicted = state.peers.stop_capture(&device_id).await?;
    Ok(Json(StopResponse { device_id, evicted }))
}

/// GET /api/devices/:device_id/stream/status
pub async fn stream_status(
    State(state): State<Arc<AppState>>,
    Path(device_id): Path<String>,
) -> Result<Json<StreamStatus>> {
    Ok(Json(state.capture.status(&device_id)?))
}

/// GET /api/streams
pub async fn list_streams(State(state): State<Arc<AppState>>) -> Json<Vec<StreamStatus>> {
    Json(state.capture.list_status())
}

// ============================================================================
// WebRTC signaling over HTTP
// ============================================================================

/// POST /api/webrtc/offer
pub async fn webrtc_offer(
    State(state): State<Arc<AppState>>,
    Json(req): Json<OfferRequest>,
) -> Result<Json<AnswerResponse>> {
    if req.viewer_id.trim().is_empty() {
        return Err(AppError::BadRequest("viewer_id is required".to_string()));
    }
    let answer = state.peers.on_offer(&req.viewer_id, req.offer).await?;
    let capture_session_id = state
        .peers
        .get_session(&req.viewer_id)
        .map(|s| s.capture_session_id().to_string())
        .ok_or_else(|| {
            AppError::NegotiationFailed("peer session ended during negotiation".to_string())
        })?;

    Ok(Json(AnswerResponse {
        viewer_id: req.viewer_id,
        capture_session_id,
        sdp: answer.sdp,
        ice_candidates: answer.ice_candidates.unwrap_or_default(),
    }))
}

/// POST /api/webrtc/ice
pub async fn webrtc_ice_candidate(
    State(state): State<Arc<AppState>>,
    Json(req): Json<IceCandidateRequest>,
) -> Result<Json<ActionResponse>> {
    state
        .peers
        .on_ice_candidate(&req.viewer_id, req.candidate)
        .await?;
    Ok(Json(ActionResponse::ok()))
}

#[derive(Debug, Deserialize)]
pub struct ViewerRequest {
    pub viewer_id: String,
}

/// POST /api/webrtc/keepalive
pub async fn webrtc_keepalive(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ViewerRequest>,
) -> Result<Json<ActionResponse>> {
    state.peers.keepalive(&req.viewer_id)?;
    Ok(Json(ActionResponse::ok()))
}

/// POST /api/webrtc/close
pub async fn webrtc_close_session(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ViewerRequest>,
) -> Json<ActionResponse> {
    state.peers.on_disconnect(&req.viewer_id).await;
    Json(ActionResponse::with_message(format!(
        "session of {} closed",
        req.viewer_id
    )))
}

/// GET /api/webrtc/sessions
pub async fn webrtc_sessions(State(state): State<Arc<AppState>>) -> Json<Vec<PeerSessionInfo>> {
    Json(state.peers.list_sessions())
}

#[derive(Debug, Serialize)]
pub struct IceServersResponse {
    pub ice_servers: Vec<IceServerInfo>,
}

/// GET /api/webrtc/ice-servers
pub async fn webrtc_ice_servers(State(state): State<Arc<AppState>>) -> Json<IceServersResponse> {
    Json(IceServersResponse {
        ice_servers: state.webrtc.ice_servers(),
    })
}
