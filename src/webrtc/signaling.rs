//! Signaling types, messages and the signaling channel capability

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::device::StreamRequest;
use crate::error::{AppError, Result};
use crate::events::SystemEvent;

/// Signaling message types
///
/// The same enum is used in both directions; `handle_signal` consumes the
/// client-originated variants and replies with the server-originated ones.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignalingMessage {
    /// SDP offer from a viewer, bound to a device and stream request
    Offer(SdpOffer),
    /// SDP answer from server
    Answer(SdpAnswer),
    /// ICE candidate (either direction)
    Candidate(IceCandidate),
    /// Error report to the viewer
    Error(SignalingError),
    /// The capture session the viewer was watching ended
    StreamEnded { device_id: String, reason: String },
    /// Peer session state notification
    State { state: ConnectionState },
    /// Liveness ping from the viewer
    Keepalive,
    /// Viewer is leaving
    Close,
}

impl SignalingMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Offer(_) => "offer",
            Self::Answer(_) => "answer",
            Self::Candidate(_) => "candidate",
            Self::Error(_) => "error",
            Self::StreamEnded { .. } => "stream_ended",
            Self::State { .. } => "state",
            Self::Keepalive => "keepalive",
            Self::Close => "close",
        }
    }
}

/// SDP offer from a viewer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SdpOffer {
    pub device_id: String,
    /// SDP content
    pub sdp: String,
    /// Streams to watch; empty joins the device's running session
    #[serde(default)]
    pub stream: StreamRequest,
}

impl SdpOffer {
    pub fn new(device_id: impl Into<String>, sdp: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            sdp: sdp.into(),
            stream: StreamRequest::default(),
        }
    }

    pub fn with_stream(mut self, stream: StreamRequest) -> Self {
        self.stream = stream;
        self
    }
}

/// SDP Answer from server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SdpAnswer {
    /// SDP content
    pub sdp: String,
    /// ICE candidates gathered during answer creation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ice_candidates: Option<Vec<IceCandidate>>,
}

impl SdpAnswer {
    pub fn new(sdp: impl Into<String>) -> Self {
        Self {
            sdp: sdp.into(),
            ice_candidates: None,
        }
    }

    pub fn with_candidates(sdp: impl Into<String>, candidates: Vec<IceCandidate>) -> Self {
        Self {
            sdp: sdp.into(),
            ice_candidates: if candidates.is_empty() {
                None
            } else {
                Some(candidates)
            },
        }
    }
}

/// ICE candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IceCandidate {
    /// Candidate string
    pub candidate: String,
    #[serde(rename = "sdpMid")]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex")]
    pub sdp_mline_index: Option<u16>,
    #[serde(rename = "usernameFragment")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
            username_fragment: None,
        }
    }

    pub fn with_mid(mut self, mid: impl Into<String>, index: u16) -> Self {
        self.sdp_mid = Some(mid.into());
        self.sdp_mline_index = Some(index);
        self
    }
}

/// Signaling error
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalingError {
    /// HTTP-style status code of the failure
    pub code: u16,
    /// Machine-readable category, e.g. "session_conflict"
    pub kind: String,
    pub message: String,
}

impl SignalingError {
    pub fn new(code: u16, kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code,
            kind: kind.into(),
            message: message.into(),
        }
    }
}

impl From<&AppError> for SignalingError {
    fn from(err: &AppError) -> Self {
        Self::new(err.status_code().as_u16(), err.code(), err.to_string())
    }
}

/// Offer request over HTTP
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfferRequest {
    pub viewer_id: String,
    #[serde(flatten)]
    pub offer: SdpOffer,
}

/// Answer response over HTTP
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerResponse {
    pub viewer_id: String,
    pub capture_session_id: String,
    pub sdp: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ice_candidates: Vec<IceCandidate>,
}

/// ICE candidate request (trickle ICE over HTTP)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IceCandidateRequest {
    pub viewer_id: String,
    pub candidate: IceCandidate,
}

/// Transport connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectionState {
    /// Transport can no longer carry frames
    pub fn is_dead(&self) -> bool {
        matches!(
            self,
            ConnectionState::Disconnected | ConnectionState::Failed | ConnectionState::Closed
        )
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::New => write!(f, "new"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Failed => write!(f, "failed"),
            ConnectionState::Closed => write!(f, "closed"),
        }
    }
}

/// Bidirectional transport to viewers
///
/// The wire encoding is up to the implementor. Disconnects are reported
/// separately through the stream consumed by
/// `PeerSessionManager::run_disconnect_listener`.
#[async_trait]
pub trait SignalingChannel: Send + Sync {
    /// Send a message to one viewer; fails if the viewer is unreachable
    async fn send(&self, viewer_id: &str, message: SignalingMessage) -> Result<()>;

    /// Push a system event to every connected viewer
    async fn broadcast(&self, event: SystemEvent);
}

/// Channel that reaches nobody, for headless runs and tests
pub struct NullSignaling;

#[async_trait]
impl SignalingChannel for NullSignaling {
    async fn send(&self, viewer_id: &str, _message: SignalingMessage) -> Result<()> {
        Err(AppError::NotFound(format!("viewer {} not connected", viewer_id)))
    }

    async fn broadcast(&self, _event: SystemEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offer_wire_format() {
        let json = r#"{"type":"offer","device_id":"D1","sdp":"v=0"}"#;
        let msg: SignalingMessage = serde_json::from_str(json).unwrap();
        match msg {
            SignalingMessage::Offer(offer) => {
                assert_eq!(offer.device_id, "D1");
                assert!(offer.stream.configs.is_empty());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_stream_ended_wire_format() {
        let msg = SignalingMessage::StreamEnded {
            device_id: "D1".into(),
            reason: "device lost".into(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "stream_ended");
        assert_eq!(json["reason"], "device lost");
        assert_eq!(msg.kind(), "stream_ended");
    }

    #[test]
    fn test_candidate_field_names() {
        let msg = SignalingMessage::Candidate(IceCandidate::new("candidate:1").with_mid("0", 0));
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["sdpMid"], "0");
        assert_eq!(json["sdpMLineIndex"], 0);
    }

    #[test]
    fn test_error_from_app_error() {
        let err = SignalingError::from(&AppError::SessionConflict("D1".into()));
        assert_eq!(err.code, 409);
        assert_eq!(err.kind, "session_conflict");
    }

    #[test]
    fn test_offer_request_flattened() {
        let json = r#"{"viewer_id":"V1","device_id":"D1","sdp":"v=0",
            "stream":{"configs":[],"apply_filters":true}}"#;
        let req: OfferRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.viewer_id, "V1");
        assert!(req.offer.stream.apply_filters);
    }
}
