//! Shared fixtures: synthetic camera, in-memory negotiator and a signaling
//! channel that records what it was asked to send.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

use realsense_monitor::capture::{CaptureManager, Frame, FrameDistributor, FrameSink};
use realsense_monitor::device::{
    DeviceRegistry, Resolution, StreamConfig, StreamFormat, StreamRequest, StreamType,
    SyntheticBackend, SyntheticDeviceSpec,
};
use realsense_monitor::error::{AppError, Result};
use realsense_monitor::events::{EventBus, SystemEvent};
use realsense_monitor::webrtc::{
    ConnectionState, IceCandidate, Negotiator, PeerSessionManager, PeerSettings, PeerTransport,
    SdpAnswer, SdpOffer, SignalingChannel, SignalingMessage,
};

/// How fake transports behave during the handshake
#[derive(Debug, Clone)]
pub enum Handshake {
    /// Answer and report Connected right away
    ConnectImmediately,
    /// Answer, then report Connected after a delay
    ConnectAfter(Duration),
    /// Answer but never connect
    NeverConnect,
    /// Take this long to answer
    SlowAnswer(Duration),
    /// Reject the offer
    Reject,
}

pub struct FakeTransport {
    pub viewer_id: String,
    state_tx: watch::Sender<ConnectionState>,
    handshake: Handshake,
    frames: AtomicU64,
    candidates: Mutex<Vec<IceCandidate>>,
    closes: AtomicUsize,
}

impl FakeTransport {
    pub fn frames_received(&self) -> u64 {
        self.frames.load(Ordering::SeqCst)
    }

    pub fn remote_candidates(&self) -> Vec<IceCandidate> {
        self.candidates.lock().clone()
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Simulate the network dropping
    pub fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }
}

#[async_trait]
impl FrameSink for FakeTransport {
    async fn send_frame(&self, _frame: &Frame) -> Result<()> {
        if self.state_tx.borrow().is_dead() {
            return Err(AppError::Internal("transport closed".into()));
        }
        self.frames.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl PeerTransport for FakeTransport {
    async fn handle_offer(&self, sdp: &str) -> Result<SdpAnswer> {
        match self.handshake.clone() {
            Handshake::Reject => {
                return Err(AppError::NegotiationFailed(format!("bad offer: {}", sdp)));
            }
            Handshake::SlowAnswer(delay) => tokio::time::sleep(delay).await,
            Handshake::ConnectImmediately => {
                self.state_tx.send_replace(ConnectionState::Connected);
            }
            Handshake::ConnectAfter(delay) => {
                self.state_tx.send_replace(ConnectionState::Connecting);
                let tx = self.state_tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    tx.send_replace(ConnectionState::Connected);
                });
            }
            Handshake::NeverConnect => {
                self.state_tx.send_replace(ConnectionState::Connecting);
            }
        }
        Ok(SdpAnswer::new(format!("answer-for-{}", self.viewer_id)))
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.candidates.lock().push(candidate);
        Ok(())
    }

    fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.state_tx.send_replace(ConnectionState::Closed);
    }
}

pub struct FakeNegotiator {
    handshake: Mutex<Handshake>,
    transports: Mutex<HashMap<String, Vec<Arc<FakeTransport>>>>,
    created: AtomicUsize,
}

impl FakeNegotiator {
    pub fn new(handshake: Handshake) -> Self {
        Self {
            handshake: Mutex::new(handshake),
            transports: Mutex::new(HashMap::new()),
            created: AtomicUsize::new(0),
        }
    }

    pub fn set_handshake(&self, handshake: Handshake) {
        *self.handshake.lock() = handshake;
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Latest transport created for a viewer
    pub fn transport(&self, viewer_id: &str) -> Option<Arc<FakeTransport>> {
        self.transports
            .lock()
            .get(viewer_id)
            .and_then(|all| all.last().cloned())
    }

    /// Every transport created for a viewer, oldest first
    pub fn transports(&self, viewer_id: &str) -> Vec<Arc<FakeTransport>> {
        self.transports
            .lock()
            .get(viewer_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl Negotiator for FakeNegotiator {
    async fn create(
        &self,
        viewer_id: &str,
        local_candidates: mpsc::UnboundedSender<IceCandidate>,
    ) -> Result<Arc<dyn PeerTransport>> {
        self.created.fetch_add(1, Ordering::SeqCst);
        let (state_tx, _) = watch::channel(ConnectionState::New);
        let transport = Arc::new(FakeTransport {
            viewer_id: viewer_id.to_string(),
            state_tx,
            handshake: self.handshake.lock().clone(),
            frames: AtomicU64::new(0),
            candidates: Mutex::new(Vec::new()),
            closes: AtomicUsize::new(0),
        });
        let _ = local_candidates.send(IceCandidate::new("candidate:1 1 udp 1 127.0.0.1 9 typ host"));
        self.transports
            .lock()
            .entry(viewer_id.to_string())
            .or_default()
            .push(transport.clone());
        Ok(transport)
    }
}

/// Signaling channel that records every message
#[derive(Default)]
pub struct RecordingSignaling {
    sent: Mutex<Vec<(String, SignalingMessage)>>,
    broadcasts: Mutex<Vec<SystemEvent>>,
}

impl RecordingSignaling {
    pub fn sent_to(&self, viewer_id: &str) -> Vec<SignalingMessage> {
        self.sent
            .lock()
            .iter()
            .filter(|(v, _)| v == viewer_id)
            .map(|(_, m)| m.clone())
            .collect()
    }

    pub fn kinds_sent_to(&self, viewer_id: &str) -> Vec<&'static str> {
        self.sent_to(viewer_id).iter().map(|m| m.kind()).collect()
    }
}

#[async_trait]
impl SignalingChannel for RecordingSignaling {
    async fn send(&self, viewer_id: &str, message: SignalingMessage) -> Result<()> {
        self.sent.lock().push((viewer_id.to_string(), message));
        Ok(())
    }

    async fn broadcast(&self, event: SystemEvent) {
        self.broadcasts.lock().push(event);
    }
}

pub struct Harness {
    pub backend: Arc<SyntheticBackend>,
    pub events: Arc<EventBus>,
    pub registry: Arc<DeviceRegistry>,
    pub capture: Arc<CaptureManager>,
    pub peers: Arc<PeerSessionManager>,
    pub negotiator: Arc<FakeNegotiator>,
    pub signaling: Arc<RecordingSignaling>,
}

impl Harness {
    pub async fn new(handshake: Handshake, settings: PeerSettings) -> Self {
        let backend = Arc::new(SyntheticBackend::with_devices(vec![
            SyntheticDeviceSpec::new("D1").with_sensor_ids("S1", "S2"),
        ]));
        let events = Arc::new(EventBus::new());
        let registry = Arc::new(DeviceRegistry::new(backend.clone(), events.clone()));
        registry.discover().await.unwrap();

        let signaling = Arc::new(RecordingSignaling::default());
        let capture = CaptureManager::new(
            registry.clone(),
            Arc::new(FrameDistributor::new(4)),
            events.clone(),
            signaling.clone(),
        );
        let negotiator = Arc::new(FakeNegotiator::new(handshake));
        let peers = PeerSessionManager::new(
            capture.clone(),
            negotiator.clone(),
            signaling.clone(),
            events.clone(),
            settings,
        );

        Self {
            backend,
            events,
            registry,
            capture,
            peers,
            negotiator,
            signaling,
        }
    }

    pub async fn default() -> Self {
        Self::new(Handshake::ConnectImmediately, PeerSettings::default()).await
    }

    pub fn is_streaming(&self, device_id: &str) -> bool {
        self.registry.get_device(device_id).unwrap().is_streaming
    }
}

pub fn depth(fps: u32) -> StreamRequest {
    StreamRequest::new(vec![StreamConfig {
        sensor_id: "S1".to_string(),
        stream_type: StreamType::Depth,
        format: StreamFormat::Z16,
        resolution: Resolution::new(640, 480),
        framerate: fps,
        enable: true,
    }])
}

pub fn offer(request: StreamRequest) -> SdpOffer {
    SdpOffer::new("D1", "v=0").with_stream(request)
}

/// Poll a condition until it holds or two seconds pass
pub async fn eventually<F: Fn() -> bool>(condition: F) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
