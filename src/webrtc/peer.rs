//! WebRTC peer connection transport
//!
//! Frames travel over data channels opened by the viewer. Each channel is
//! named after the stream it wants (`depth`, `color`, `infrared`, `gyro`,
//! `accel`, `pointcloud`); a channel labelled `frames` receives every stream
//! that has no dedicated channel.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

use super::config::WebRtcConfig;
use super::signaling::{ConnectionState, IceCandidate, SdpAnswer};
use super::transport::{Negotiator, PeerTransport};
use crate::capture::{Frame, FrameSink, DEFAULT_CHUNK_PAYLOAD};
use crate::error::{AppError, Result};

/// Label of the catch-all frame channel
pub const FALLBACK_CHANNEL: &str = "frames";

/// Time given to host candidate gathering before the answer is returned
const GATHER_GRACE: Duration = Duration::from_millis(100);

/// Peer connection wrapper with event handling
pub struct PeerConnection {
    viewer_id: String,
    pc: Arc<RTCPeerConnection>,
    /// Open data channels by label
    channels: Arc<RwLock<HashMap<String, Arc<RTCDataChannel>>>>,
    state_rx: watch::Receiver<ConnectionState>,
    /// Candidates gathered so far, returned with the answer
    ice_candidates: Arc<Mutex<Vec<IceCandidate>>>,
}

impl PeerConnection {
    /// Create a new peer connection
    pub async fn new(
        config: &WebRtcConfig,
        viewer_id: &str,
        local_candidates: mpsc::UnboundedSender<IceCandidate>,
    ) -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs().map_err(|e| {
            AppError::NegotiationFailed(format!("Failed to register codecs: {}", e))
        })?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine).map_err(|e| {
            AppError::NegotiationFailed(format!("Failed to register interceptors: {}", e))
        })?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let mut ice_servers = vec![];
        for stun_url in &config.stun_servers {
            ice_servers.push(RTCIceServer {
                urls: vec![stun_url.clone()],
                ..Default::default()
            });
        }
        for turn in &config.turn_servers {
            ice_servers.push(RTCIceServer {
                urls: turn.urls.clone(),
                username: turn.username.clone(),
                credential: turn.credential.clone(),
                ..Default::default()
            });
        }

        let rtc_config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };

        let pc = api.new_peer_connection(rtc_config).await.map_err(|e| {
            AppError::NegotiationFailed(format!("Failed to create peer connection: {}", e))
        })?;

        let (state_tx, state_rx) = watch::channel(ConnectionState::New);
        let peer = Self {
            viewer_id: viewer_id.to_string(),
            pc: Arc::new(pc),
            channels: Arc::new(RwLock::new(HashMap::new())),
            state_rx,
            ice_candidates: Arc::new(Mutex::new(vec![])),
        };
        peer.setup_event_handlers(Arc::new(state_tx), local_candidates);
        Ok(peer)
    }

    fn setup_event_handlers(
        &self,
        state: Arc<watch::Sender<ConnectionState>>,
        local_candidates: mpsc::UnboundedSender<IceCandidate>,
    ) {
        let viewer_id = self.viewer_id.clone();
        self.pc
            .on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
                let state = state.clone();
                let viewer_id = viewer_id.clone();

                Box::pin(async move {
                    let new_state = match s {
                        RTCPeerConnectionState::New => ConnectionState::New,
                        RTCPeerConnectionState::Connecting => ConnectionState::Connecting,
                        RTCPeerConnectionState::Connected => ConnectionState::Connected,
                        RTCPeerConnectionState::Disconnected => ConnectionState::Disconnected,
                        RTCPeerConnectionState::Failed => ConnectionState::Failed,
                        RTCPeerConnectionState::Closed => ConnectionState::Closed,
                        _ => return,
                    };

                    info!("Peer {} connection state: {}", viewer_id, new_state);
                    let _ = state.send(new_state);
                })
            }));

        let ice_candidates = self.ice_candidates.clone();
        self.pc
            .on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                let ice_candidates = ice_candidates.clone();
                let local_candidates = local_candidates.clone();

                Box::pin(async move {
                    let Some(c) = candidate else {
                        return;
                    };
                    let json = match c.to_json() {
                        Ok(json) => json,
                        Err(e) => {
                            debug!("Skipping unserializable ICE candidate: {}", e);
                            return;
                        }
                    };
                    debug!("ICE candidate: {}", json.candidate);

                    let candidate = IceCandidate {
                        candidate: json.candidate,
                        sdp_mid: json.sdp_mid,
                        sdp_mline_index: json.sdp_mline_index,
                        username_fragment: json.username_fragment,
                    };
                    ice_candidates.lock().await.push(candidate.clone());
                    let _ = local_candidates.send(candidate);
                })
            }));

        let channels = self.channels.clone();
        let viewer_id = self.viewer_id.clone();
        self.pc
            .on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
                let channels = channels.clone();
                let viewer_id = viewer_id.clone();

                Box::pin(async move {
                    let label = dc.label().to_string();
                    info!("Data channel '{}' opened by {}", label, viewer_id);

                    let on_close_channels = channels.clone();
                    let on_close_label = label.clone();
                    dc.on_close(Box::new(move || {
                        let channels = on_close_channels.clone();
                        let label = on_close_label.clone();
                        Box::pin(async move {
                            channels.write().await.remove(&label);
                        })
                    }));

                    channels.write().await.insert(label, dc);
                })
            }));
    }

    async fn channel_for(&self, frame: &Frame) -> Option<Arc<RTCDataChannel>> {
        let channels = self.channels.read().await;
        channels
            .get(frame.channel_label())
            .or_else(|| channels.get(FALLBACK_CHANNEL))
            .filter(|dc| dc.ready_state() == RTCDataChannelState::Open)
            .cloned()
    }

    pub fn viewer_id(&self) -> &str {
        &self.viewer_id
    }
}

#[async_trait]
impl FrameSink for PeerConnection {
    async fn send_frame(&self, frame: &Frame) -> Result<()> {
        // Viewer has not opened a channel for this stream
        let Some(dc) = self.channel_for(frame).await else {
            return Ok(());
        };

        for chunk in frame.chunks(DEFAULT_CHUNK_PAYLOAD) {
            dc.send(&chunk).await.map_err(|e| {
                AppError::Internal(format!("Failed to send on '{}': {}", dc.label(), e))
            })?;
        }
        Ok(())
    }
}

#[async_trait]
impl PeerTransport for PeerConnection {
    async fn handle_offer(&self, sdp: &str) -> Result<SdpAnswer> {
        let offer = RTCSessionDescription::offer(sdp.to_string())
            .map_err(|e| AppError::NegotiationFailed(format!("Invalid SDP offer: {}", e)))?;

        self.pc.set_remote_description(offer).await.map_err(|e| {
            AppError::NegotiationFailed(format!("Failed to set remote description: {}", e))
        })?;

        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| AppError::NegotiationFailed(format!("Failed to create answer: {}", e)))?;

        self.pc
            .set_local_description(answer.clone())
            .await
            .map_err(|e| {
                AppError::NegotiationFailed(format!("Failed to set local description: {}", e))
            })?;

        // Later candidates are trickled
        tokio::time::sleep(GATHER_GRACE).await;
        let candidates = self.ice_candidates.lock().await.clone();

        Ok(SdpAnswer::with_candidates(answer.sdp, candidates))
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        };

        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|e| AppError::BadRequest(format!("Failed to add ICE candidate: {}", e)))
    }

    fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    async fn close(&self) {
        self.channels.write().await.clear();
        if let Err(e) = self.pc.close().await {
            warn!("Failed to close peer connection of {}: {}", self.viewer_id, e);
        }
    }
}

/// Negotiator backed by webrtc-rs
pub struct WebRtcNegotiator {
    config: WebRtcConfig,
}

impl WebRtcNegotiator {
    pub fn new(config: WebRtcConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &WebRtcConfig {
        &self.config
    }
}

#[async_trait]
impl Negotiator for WebRtcNegotiator {
    async fn create(
        &self,
        viewer_id: &str,
        local_candidates: mpsc::UnboundedSender<IceCandidate>,
    ) -> Result<Arc<dyn PeerTransport>> {
        let peer = PeerConnection::new(&self.config, viewer_id, local_candidates).await?;
        Ok(Arc::new(peer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_new_peer_starts_in_new_state() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let peer = PeerConnection::new(&WebRtcConfig::default(), "V1", tx)
            .await
            .unwrap();
        assert_eq!(peer.state(), ConnectionState::New);
        assert_eq!(peer.viewer_id(), "V1");
        peer.close().await;
    }

    #[tokio::test]
    async fn test_frames_without_channel_are_skipped() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let peer = PeerConnection::new(&WebRtcConfig::default(), "V1", tx)
            .await
            .unwrap();
        let frame = Frame::point_cloud(&[[0.0, 0.0, 1.0]], 1);
        assert!(!frame.chunks(DEFAULT_CHUNK_PAYLOAD).is_empty());
        assert!(peer.send_frame(&frame).await.is_ok());
        peer.close().await;
    }

    #[tokio::test]
    async fn test_garbage_offer_fails_negotiation() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let peer = PeerConnection::new(&WebRtcConfig::default(), "V1", tx)
            .await
            .unwrap();
        let err = peer.handle_offer("not an sdp").await.unwrap_err();
        assert!(matches!(err, AppError::NegotiationFailed(_)));
        peer.close().await;
    }
}
