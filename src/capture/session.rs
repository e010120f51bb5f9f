//! Capture session state
//!
//! A capture session is the live, exclusive pipeline bound to one device.
//! Lifecycle transitions are driven by the capture manager while it holds
//! the device lock; the accessors here are safe to call from anywhere.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::device::{ClaimHandle, StreamRequest, StreamStatus};

/// Capture session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureState {
    Idle,
    Starting,
    Active,
    Stopping,
}

impl std::fmt::Display for CaptureState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CaptureState::Idle => "idle",
            CaptureState::Starting => "starting",
            CaptureState::Active => "active",
            CaptureState::Stopping => "stopping",
        };
        f.write_str(s)
    }
}

/// Live capture session of one device
pub struct CaptureSession {
    id: String,
    device_id: String,
    request: StreamRequest,
    started_at: Instant,
    started_at_utc: DateTime<Utc>,
    state_tx: watch::Sender<CaptureState>,
    subscribers: Mutex<BTreeSet<String>>,
    keep_alive: AtomicBool,
    point_cloud: AtomicBool,
    frames: AtomicU64,
    /// f64 bits of the last measured framerate
    fps_bits: AtomicU64,
    /// Exclusive hardware claim, present from claim until release
    pub(crate) claim: Mutex<Option<ClaimHandle>>,
    pub(crate) pump_cancel: CancellationToken,
}

impl CaptureSession {
    pub(crate) fn new(device_id: &str, request: StreamRequest) -> Self {
        let (state_tx, _) = watch::channel(CaptureState::Idle);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            device_id: device_id.to_string(),
            request: request.normalized(),
            started_at: Instant::now(),
            started_at_utc: Utc::now(),
            state_tx,
            subscribers: Mutex::new(BTreeSet::new()),
            keep_alive: AtomicBool::new(false),
            point_cloud: AtomicBool::new(false),
            frames: AtomicU64::new(0),
            fps_bits: AtomicU64::new(0f64.to_bits()),
            claim: Mutex::new(None),
            pump_cancel: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Accepted request with only enabled configs
    pub fn request(&self) -> &StreamRequest {
        &self.request
    }

    pub fn state(&self) -> CaptureState {
        *self.state_tx.borrow()
    }

    pub fn state_watch(&self) -> watch::Receiver<CaptureState> {
        self.state_tx.subscribe()
    }

    pub(crate) fn set_state(&self, state: CaptureState) {
        self.state_tx.send_replace(state);
    }

    pub fn is_active(&self) -> bool {
        self.state() == CaptureState::Active
    }

    /// Same enabled configs, align target and filter flag
    pub fn is_compatible(&self, request: &StreamRequest) -> bool {
        self.request.is_compatible(request)
    }

    pub fn subscribers(&self) -> Vec<String> {
        self.subscribers.lock().iter().cloned().collect()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    pub fn has_subscriber(&self, viewer_id: &str) -> bool {
        self.subscribers.lock().contains(viewer_id)
    }

    pub(crate) fn add_subscriber(&self, viewer_id: &str) -> bool {
        self.subscribers.lock().insert(viewer_id.to_string())
    }

    pub(crate) fn remove_subscriber(&self, viewer_id: &str) -> bool {
        self.subscribers.lock().remove(viewer_id)
    }

    pub(crate) fn drain_subscribers(&self) -> Vec<String> {
        std::mem::take(&mut *self.subscribers.lock())
            .into_iter()
            .collect()
    }

    /// Explicitly started sessions survive an empty subscriber set
    pub fn is_keep_alive(&self) -> bool {
        self.keep_alive.load(Ordering::SeqCst)
    }

    pub(crate) fn set_keep_alive(&self, keep_alive: bool) {
        self.keep_alive.store(keep_alive, Ordering::SeqCst);
    }

    pub fn point_cloud_active(&self) -> bool {
        self.point_cloud.load(Ordering::SeqCst)
    }

    pub(crate) fn set_point_cloud(&self, active: bool) {
        self.point_cloud.store(active, Ordering::SeqCst);
    }

    pub fn frames_captured(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    pub(crate) fn count_frame(&self) {
        self.frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn framerate(&self) -> f64 {
        f64::from_bits(self.fps_bits.load(Ordering::Relaxed))
    }

    pub(crate) fn set_framerate(&self, fps: f64) {
        self.fps_bits.store(fps.to_bits(), Ordering::Relaxed);
    }

    pub fn uptime_secs(&self) -> f64 {
        self.started_at.elapsed().as_secs_f64()
    }

    /// Snapshot for status queries
    pub fn status(&self) -> StreamStatus {
        let active = self.is_active();
        StreamStatus {
            device_id: self.device_id.clone(),
            is_streaming: active,
            session_id: Some(self.id.clone()),
            active_streams: self
                .request
                .enabled()
                .map(|c| c.stream_type.to_string())
                .collect(),
            framerate: active.then(|| self.framerate()),
            duration: active.then(|| self.uptime_secs()),
            subscribers: self.subscriber_count(),
            started_at: Some(self.started_at_utc),
        }
    }
}

impl std::fmt::Debug for CaptureSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureSession")
            .field("id", &self.id)
            .field("device_id", &self.device_id)
            .field("state", &self.state())
            .field("subscribers", &self.subscriber_count())
            .field("keep_alive", &self.is_keep_alive())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{Resolution, StreamConfig, StreamFormat, StreamType};

    fn session() -> CaptureSession {
        CaptureSession::new(
            "D1",
            StreamRequest::new(vec![StreamConfig {
                sensor_id: "S1".into(),
                stream_type: StreamType::Depth,
                format: StreamFormat::Z16,
                resolution: Resolution::VGA,
                framerate: 30,
                enable: true,
            }]),
        )
    }

    #[test]
    fn test_subscribers() {
        let s = session();
        assert!(s.add_subscriber("v1"));
        assert!(!s.add_subscriber("v1"));
        assert!(s.add_subscriber("v2"));
        assert_eq!(s.subscribers(), vec!["v1", "v2"]);
        assert!(s.remove_subscriber("v1"));
        assert_eq!(s.drain_subscribers(), vec!["v2"]);
        assert_eq!(s.subscriber_count(), 0);
    }

    #[test]
    fn test_status_reflects_state() {
        let s = session();
        assert!(!s.status().is_streaming);
        assert!(s.status().framerate.is_none());

        s.set_state(CaptureState::Active);
        s.set_framerate(29.5);
        let status = s.status();
        assert!(status.is_streaming);
        assert_eq!(status.active_streams, vec!["depth"]);
        assert_eq!(status.framerate, Some(29.5));
    }

    #[test]
    fn test_state_watch() {
        let s = session();
        let rx = s.state_watch();
        s.set_state(CaptureState::Starting);
        assert_eq!(*rx.borrow(), CaptureState::Starting);
    }
}
