//! Capture session manager
//!
//! Owns at most one live capture session per device. Every lifecycle
//! transition of a device runs under that device's async lock, and
//! blocking backend calls are moved to the blocking pool while the lock is
//! held. Frames are pumped from the backend stream into the session's
//! distributor ring by a task that never takes the lock.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::distributor::{FrameDistributor, FramePublisher};
use super::session::{CaptureSession, CaptureState};
use crate::device::{
    run_blocking, DeviceRegistry, FrameStream, HardwareBackend, PointCloudStatus, StreamRequest,
    StreamStatus, StreamType,
};
use crate::error::{AppError, Result};
use crate::events::{EventBus, SystemEvent};
use crate::webrtc::signaling::{SignalingChannel, SignalingMessage};

/// Interval of framerate measurements and stats events
const STATS_INTERVAL: Duration = Duration::from_secs(1);

/// Subscribers cut off by a capture session ending
#[derive(Debug, Clone)]
pub struct Eviction {
    pub device_id: String,
    pub session_id: String,
    pub viewers: Vec<String>,
    pub reason: String,
}

/// Per-device lock plus a lock-free view of the current session
#[derive(Default)]
struct DeviceSlot {
    lock: tokio::sync::Mutex<()>,
    current: RwLock<Option<Arc<CaptureSession>>>,
}

impl DeviceSlot {
    fn current(&self) -> Option<Arc<CaptureSession>> {
        self.current.read().clone()
    }

    fn is_current(&self, session: &Arc<CaptureSession>) -> bool {
        self.current
            .read()
            .as_ref()
            .is_some_and(|s| Arc::ptr_eq(s, session))
    }
}

/// Manager of per-device capture sessions
pub struct CaptureManager {
    registry: Arc<DeviceRegistry>,
    backend: Arc<dyn HardwareBackend>,
    distributor: Arc<FrameDistributor>,
    events: Arc<EventBus>,
    signaling: Arc<dyn SignalingChannel>,
    slots: Mutex<HashMap<String, Arc<DeviceSlot>>>,
    evictions: broadcast::Sender<Eviction>,
}

impl CaptureManager {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        distributor: Arc<FrameDistributor>,
        events: Arc<EventBus>,
        signaling: Arc<dyn SignalingChannel>,
    ) -> Arc<Self> {
        let (evictions, _) = broadcast::channel(64);
        Arc::new(Self {
            backend: registry.backend().clone(),
            registry,
            distributor,
            events,
            signaling,
            slots: Mutex::new(HashMap::new()),
            evictions,
        })
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    pub fn distributor(&self) -> &Arc<FrameDistributor> {
        &self.distributor
    }

    /// Sessions ending with subscribers still attached
    pub fn subscribe_evictions(&self) -> broadcast::Receiver<Eviction> {
        self.evictions.subscribe()
    }

    fn slot(&self, device_id: &str) -> Arc<DeviceSlot> {
        self.slots
            .lock()
            .entry(device_id.to_string())
            .or_default()
            .clone()
    }

    /// Current live session of a device, if any
    pub fn session(&self, device_id: &str) -> Option<Arc<CaptureSession>> {
        let slot = self.slots.lock().get(device_id).cloned()?;
        slot.current().filter(|s| s.is_active())
    }

    /// Whether a session handle still refers to the device's live session
    pub fn is_live(&self, session: &Arc<CaptureSession>) -> bool {
        session.is_active()
            && self
                .slots
                .lock()
                .get(session.device_id())
                .is_some_and(|slot| slot.is_current(session))
    }

    /// Return the device's active session, starting one if needed
    ///
    /// With a subscriber, the viewer joins the session. Without one this
    /// is an explicit start and the session is kept alive until stopped.
    /// An active session with a different enabled configuration yields
    /// `SessionConflict`; an empty request joins whatever is running.
    pub async fn ensure_session(
        self: &Arc<Self>,
        device_id: &str,
        request: &StreamRequest,
        subscriber: Option<&str>,
    ) -> Result<Arc<CaptureSession>> {
        let slot = self.slot(device_id);
        let _guard = slot.lock.lock().await;

        if let Some(session) = slot.current().filter(|s| s.is_active()) {
            if request.has_enabled() && !session.is_compatible(request) {
                return Err(AppError::SessionConflict(format!(
                    "device {} is already streaming a different configuration",
                    device_id
                )));
            }
            match subscriber {
                Some(viewer) => {
                    session.add_subscriber(viewer);
                    debug!("Viewer {} joined capture session {}", viewer, session.id());
                }
                None => session.set_keep_alive(true),
            }
            return Ok(session);
        }

        if !request.has_enabled() {
            return Err(AppError::NotFound(format!(
                "no active capture session on device {}",
                device_id
            )));
        }
        self.registry.validate_request(device_id, request)?;

        let session = Arc::new(CaptureSession::new(device_id, request.clone()));
        session.set_state(CaptureState::Starting);
        info!(
            "Starting capture on {} ({} streams, session {})",
            device_id,
            session.request().configs.len(),
            session.id()
        );

        let backend = self.backend.clone();
        let dev = device_id.to_string();
        let handle = run_blocking(move || backend.claim(&dev)).await.map_err(|e| {
            session.set_state(CaptureState::Idle);
            e
        })?;
        *session.claim.lock() = Some(handle);

        let stream = match self.configure_and_start(&session).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Capture start on {} failed: {}", device_id, e);
                self.release_claim(&session).await;
                session.set_state(CaptureState::Idle);
                return Err(e);
            }
        };

        let publisher = self.distributor.open(session.id());
        match subscriber {
            Some(viewer) => {
                session.add_subscriber(viewer);
            }
            None => session.set_keep_alive(true),
        }
        session.set_state(CaptureState::Active);
        *slot.current.write() = Some(session.clone());
        self.registry.set_streaming(device_id, true);

        tokio::spawn(pump(
            Arc::downgrade(self),
            session.clone(),
            stream,
            publisher,
        ));

        self.events.publish(SystemEvent::StreamStarted {
            device_id: device_id.to_string(),
            session_id: session.id().to_string(),
            streams: session
                .request()
                .enabled()
                .map(|c| c.stream_type.to_string())
                .collect(),
        });
        info!("Capture session {} active on {}", session.id(), device_id);
        Ok(session)
    }

    async fn configure_and_start(&self, session: &Arc<CaptureSession>) -> Result<FrameStream> {
        let backend = self.backend.clone();
        let s = session.clone();
        run_blocking(move || {
            let claim = s.claim.lock();
            let handle = claim
                .as_ref()
                .ok_or_else(|| AppError::Internal("claim missing".to_string()))?;
            backend.configure(handle, s.request())?;
            let started = backend.start(handle);
            started.map_err(|e| match e {
                e @ AppError::CaptureStartFailed { .. } => e,
                other => AppError::CaptureStartFailed {
                    device: s.device_id().to_string(),
                    reason: other.to_string(),
                },
            })
        })
        .await
    }

    /// Stop the pipeline (if running) and give the claim back
    async fn release_claim(&self, session: &Arc<CaptureSession>) {
        let Some(handle) = session.claim.lock().take() else {
            return;
        };
        let backend = self.backend.clone();
        let device_id = session.device_id().to_string();
        let result = run_blocking(move || {
            let stopped = backend.stop(&handle);
            backend.release(handle);
            stopped
        })
        .await;
        if let Err(e) = result {
            // expected when the device is already gone
            debug!("Stopping pipeline on {} reported: {}", device_id, e);
        }
    }

    /// Add a viewer to a live session
    pub async fn add_subscriber(
        &self,
        session: &Arc<CaptureSession>,
        viewer_id: &str,
    ) -> Result<()> {
        let slot = self.slot(session.device_id());
        let _guard = slot.lock.lock().await;
        if !slot.is_current(session) || !session.is_active() {
            return Err(AppError::NotFound(format!(
                "capture session {} has ended",
                session.id()
            )));
        }
        session.add_subscriber(viewer_id);
        Ok(())
    }

    /// Remove a viewer; the last one out stops a non keep-alive session
    ///
    /// No-op for sessions that are no longer current.
    pub async fn remove_subscriber(&self, session: &Arc<CaptureSession>, viewer_id: &str) {
        let slot = self.slot(session.device_id());
        let _guard = slot.lock.lock().await;
        if !slot.is_current(session) {
            return;
        }
        session.remove_subscriber(viewer_id);
        if session.subscriber_count() == 0 && !session.is_keep_alive() {
            info!(
                "Last viewer left {}, stopping capture session {}",
                session.device_id(),
                session.id()
            );
            self.teardown(&slot, session, "no subscribers", false).await;
        }
    }

    /// Administrative stop; returns the evicted subscribers
    pub async fn stop(&self, device_id: &str) -> Result<Vec<String>> {
        let slot = self.slot(device_id);
        let _guard = slot.lock.lock().await;
        let session = slot.current().ok_or_else(|| {
            AppError::NotFound(format!("no active capture session on device {}", device_id))
        })?;
        Ok(self.teardown(&slot, &session, "stopped", true).await)
    }

    /// Release every non keep-alive session without subscribers
    ///
    /// Returns the device ids that were stopped.
    pub async fn reap_idle(&self) -> Vec<String> {
        let slots: Vec<(String, Arc<DeviceSlot>)> = self
            .slots
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let mut reaped = Vec::new();
        for (device_id, slot) in slots {
            let _guard = slot.lock.lock().await;
            let Some(session) = slot.current() else {
                continue;
            };
            if session.subscriber_count() == 0 && !session.is_keep_alive() {
                info!("Reaping idle capture session {} on {}", session.id(), device_id);
                self.teardown(&slot, &session, "idle", false).await;
                reaped.push(device_id);
            }
        }
        reaped
    }

    /// The device disappeared; stop its session and tell the viewers
    ///
    /// The slot stays so a re-plugged device keeps serializing on the
    /// same lock.
    pub async fn on_device_removed(&self, device_id: &str) -> Vec<String> {
        let slot = self.slot(device_id);
        let _guard = slot.lock.lock().await;
        match slot.current() {
            Some(session) => self.teardown(&slot, &session, "device lost", true).await,
            None => Vec::new(),
        }
    }

    /// The frame stream ended on its own
    async fn on_stream_ended(&self, session: &Arc<CaptureSession>) {
        let slot = self.slot(session.device_id());
        let _guard = slot.lock.lock().await;
        if !slot.is_current(session) || !session.is_active() {
            return;
        }
        warn!(
            "Frame stream of {} ended unexpectedly, treating device as lost",
            session.device_id()
        );
        self.events.error(
            "capture",
            format!("capture on {} stopped: device lost", session.device_id()),
        );
        self.teardown(&slot, session, "device lost", true).await;
    }

    /// Stop everything (process shutdown)
    pub async fn shutdown(&self) {
        let devices: Vec<String> = self.slots.lock().keys().cloned().collect();
        for device_id in devices {
            let slot = self.slot(&device_id);
            let _guard = slot.lock.lock().await;
            if let Some(session) = slot.current() {
                self.teardown(&slot, &session, "shutdown", true).await;
            }
        }
    }

    /// Active -> Stopping -> Idle. Caller holds the slot lock.
    async fn teardown(
        &self,
        slot: &DeviceSlot,
        session: &Arc<CaptureSession>,
        reason: &str,
        notify: bool,
    ) -> Vec<String> {
        session.set_state(CaptureState::Stopping);
        session.pump_cancel.cancel();

        let evicted = session.drain_subscribers();
        self.distributor.close(session.id());
        self.release_claim(session).await;
        session.set_point_cloud(false);
        self.registry.set_streaming(session.device_id(), false);
        session.set_state(CaptureState::Idle);
        {
            let mut current = slot.current.write();
            if current.as_ref().is_some_and(|s| Arc::ptr_eq(s, session)) {
                *current = None;
            }
        }

        info!(
            "Capture session {} on {} stopped ({}), {} viewers evicted",
            session.id(),
            session.device_id(),
            reason,
            evicted.len()
        );

        if notify {
            for viewer in &evicted {
                let msg = SignalingMessage::StreamEnded {
                    device_id: session.device_id().to_string(),
                    reason: reason.to_string(),
                };
                if let Err(e) = self.signaling.send(viewer, msg).await {
                    debug!("Could not notify {} of stream end: {}", viewer, e);
                }
            }
        }
        if !evicted.is_empty() {
            let _ = self.evictions.send(Eviction {
                device_id: session.device_id().to_string(),
                session_id: session.id().to_string(),
                viewers: evicted.clone(),
                reason: reason.to_string(),
            });
        }
        self.events.publish(SystemEvent::StreamStopped {
            device_id: session.device_id().to_string(),
            session_id: session.id().to_string(),
            reason: reason.to_string(),
        });
        evicted
    }

    /// Streaming status of a device
    pub fn status(&self, device_id: &str) -> Result<StreamStatus> {
        self.registry.get_device(device_id)?;
        Ok(self
            .session(device_id)
            .map(|s| s.status())
            .unwrap_or_else(|| StreamStatus::idle(device_id)))
    }

    /// Status of every known device
    pub fn list_status(&self) -> Vec<StreamStatus> {
        self.registry
            .list_devices()
            .into_iter()
            .map(|d| {
                self.session(&d.device_id)
                    .map(|s| s.status())
                    .unwrap_or_else(|| StreamStatus::idle(&d.device_id))
            })
            .collect()
    }

    /// Toggle point cloud output on the device's active session
    pub async fn set_point_cloud(&self, device_id: &str, enabled: bool) -> Result<PointCloudStatus> {
        self.registry.get_device(device_id)?;
        let slot = self.slot(device_id);
        let _guard = slot.lock.lock().await;
        let session = slot.current().filter(|s| s.is_active()).ok_or_else(|| {
            AppError::NotFound(format!("no active capture session on device {}", device_id))
        })?;
        if !session.request().has_stream(StreamType::Depth) {
            return Err(AppError::InvalidConfig(
                "point cloud requires an enabled depth stream".to_string(),
            ));
        }

        if session.point_cloud_active() != enabled {
            let backend = self.backend.clone();
            let s = session.clone();
            run_blocking(move || {
                let claim = s.claim.lock();
                let handle = claim
                    .as_ref()
                    .ok_or_else(|| AppError::Internal("claim missing".to_string()))?;
                let result = backend.set_point_cloud(handle, enabled);
                result
            })
            .await?;
            session.set_point_cloud(enabled);
            info!(
                "Point cloud {} on {}",
                if enabled { "enabled" } else { "disabled" },
                device_id
            );
            self.events.publish(SystemEvent::PointCloudChanged {
                device_id: device_id.to_string(),
                is_active: enabled,
            });
        }

        Ok(PointCloudStatus {
            device_id: device_id.to_string(),
            is_active: enabled,
        })
    }

    pub fn point_cloud_status(&self, device_id: &str) -> Result<PointCloudStatus> {
        self.registry.get_device(device_id)?;
        Ok(PointCloudStatus {
            device_id: device_id.to_string(),
            is_active: self
                .session(device_id)
                .is_some_and(|s| s.point_cloud_active()),
        })
    }

    fn publish_stats(&self, session: &CaptureSession) {
        self.events.publish(SystemEvent::StreamStats {
            device_id: session.device_id().to_string(),
            session_id: session.id().to_string(),
            fps: session.framerate(),
            subscribers: self.distributor.session_stats(session.id()),
        });
    }
}

/// Move frames from the backend stream into the distributor ring
async fn pump(
    manager: Weak<CaptureManager>,
    session: Arc<CaptureSession>,
    mut stream: FrameStream,
    publisher: FramePublisher,
) {
    let cancel = session.pump_cancel.clone();
    let mut ticker = tokio::time::interval(STATS_INTERVAL);
    ticker.tick().await;
    let mut window_start = Instant::now();
    let mut window_frames = 0u64;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Frame pump for {} cancelled", session.id());
                return;
            }
            _ = ticker.tick() => {
                let elapsed = window_start.elapsed().as_secs_f64();
                if elapsed > 0.0 {
                    session.set_framerate(window_frames as f64 / elapsed);
                }
                window_start = Instant::now();
                window_frames = 0;
                match manager.upgrade() {
                    Some(m) => m.publish_stats(&session),
                    None => return,
                }
            }
            frame = stream.next() => match frame {
                Some(frame) => {
                    window_frames += 1;
                    session.count_frame();
                    publisher.publish(frame);
                }
                None => break,
            }
        }
    }

    if let Some(m) = manager.upgrade() {
        m.on_stream_ended(&session).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{
        Resolution, StreamConfig, StreamFormat, SyntheticBackend, SyntheticDeviceSpec,
    };
    use crate::webrtc::signaling::NullSignaling;

    fn depth_request(fps: u32) -> StreamRequest {
        StreamRequest::new(vec![StreamConfig {
            sensor_id: "S1".to_string(),
            stream_type: StreamType::Depth,
            format: StreamFormat::Z16,
            resolution: Resolution::VGA,
            framerate: fps,
            enable: true,
        }])
    }

    async fn manager() -> (Arc<SyntheticBackend>, Arc<CaptureManager>) {
        let backend = Arc::new(SyntheticBackend::with_devices(vec![
            SyntheticDeviceSpec::new("D1").with_sensor_ids("S1", "S2"),
        ]));
        let events = Arc::new(EventBus::new());
        let registry = Arc::new(DeviceRegistry::new(backend.clone(), events.clone()));
        registry.discover().await.unwrap();
        let manager = CaptureManager::new(
            registry,
            Arc::new(FrameDistributor::new(4)),
            events,
            Arc::new(NullSignaling),
        );
        (backend, manager)
    }

    #[tokio::test]
    async fn test_ensure_session_starts_and_joins() {
        let (backend, manager) = manager().await;
        let a = manager
            .ensure_session("D1", &depth_request(30), Some("v1"))
            .await
            .unwrap();
        let b = manager
            .ensure_session("D1", &depth_request(30), Some("v2"))
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.subscriber_count(), 2);
        assert_eq!(backend.start_count(), 1);
        assert!(manager.registry().get_device("D1").unwrap().is_streaming);
    }

    #[tokio::test]
    async fn test_conflicting_config() {
        let (_backend, manager) = manager().await;
        manager
            .ensure_session("D1", &depth_request(30), Some("v1"))
            .await
            .unwrap();
        let err = manager
            .ensure_session("D1", &depth_request(15), Some("v2"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::SessionConflict(_)));

        // empty request joins
        let joined = manager
            .ensure_session("D1", &StreamRequest::default(), Some("v3"))
            .await
            .unwrap();
        assert!(joined.has_subscriber("v3"));
    }

    #[tokio::test]
    async fn test_empty_request_without_session() {
        let (_backend, manager) = manager().await;
        let err = manager
            .ensure_session("D1", &StreamRequest::default(), Some("v1"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_last_subscriber_leaving_stops_capture() {
        let (backend, manager) = manager().await;
        let session = manager
            .ensure_session("D1", &depth_request(30), Some("v1"))
            .await
            .unwrap();
        manager.remove_subscriber(&session, "v1").await;

        assert_eq!(session.state(), CaptureState::Idle);
        assert!(!manager.registry().get_device("D1").unwrap().is_streaming);
        assert!(!backend.is_claimed("D1"));
        assert!(manager.session("D1").is_none());

        // removing again is a no-op
        manager.remove_subscriber(&session, "v1").await;
    }

    #[tokio::test]
    async fn test_explicit_start_is_keep_alive() {
        let (_backend, manager) = manager().await;
        let session = manager
            .ensure_session("D1", &depth_request(30), None)
            .await
            .unwrap();
        assert!(session.is_keep_alive());
        assert!(manager.reap_idle().await.is_empty());
        assert!(session.is_active());

        let evicted = manager.stop("D1").await.unwrap();
        assert!(evicted.is_empty());
        assert!(!session.is_active());
        assert!(matches!(manager.stop("D1").await, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_start_failure_releases_claim() {
        let (backend, manager) = manager().await;
        backend.fail_next_start("D1", "firmware hiccup");
        let err = manager
            .ensure_session("D1", &depth_request(30), Some("v1"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::CaptureStartFailed { .. }));
        assert!(!backend.is_claimed("D1"));
        assert!(!manager.registry().get_device("D1").unwrap().is_streaming);

        // caller may retry
        assert!(manager
            .ensure_session("D1", &depth_request(30), Some("v1"))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_configure_refusal_is_unsupported() {
        let (backend, manager) = manager().await;
        backend.reject_next_configure("D1");
        let err = manager
            .ensure_session("D1", &depth_request(30), Some("v1"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Unsupported(_)));
        assert!(!backend.is_claimed("D1"));
    }

    #[tokio::test]
    async fn test_busy_device() {
        let (backend, manager) = manager().await;
        backend.set_busy("D1", true);
        let err = manager
            .ensure_session("D1", &depth_request(30), Some("v1"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::DeviceBusy(_)));
    }

    #[tokio::test]
    async fn test_point_cloud_requires_depth() {
        let (_backend, manager) = manager().await;
        assert!(matches!(
            manager.set_point_cloud("D1", true).await,
            Err(AppError::NotFound(_))
        ));

        let color = StreamRequest::new(vec![StreamConfig {
            sensor_id: "S2".to_string(),
            stream_type: StreamType::Color,
            format: StreamFormat::Rgb8,
            resolution: Resolution::VGA,
            framerate: 30,
            enable: true,
        }]);
        manager.ensure_session("D1", &color, None).await.unwrap();
        assert!(matches!(
            manager.set_point_cloud("D1", true).await,
            Err(AppError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_point_cloud_toggle() {
        let (_backend, manager) = manager().await;
        manager
            .ensure_session("D1", &depth_request(30), None)
            .await
            .unwrap();
        let status = manager.set_point_cloud("D1", true).await.unwrap();
        assert!(status.is_active);
        assert!(manager.point_cloud_status("D1").unwrap().is_active);
        manager.set_point_cloud("D1", false).await.unwrap();
        assert!(!manager.point_cloud_status("D1").unwrap().is_active);
    }

    #[tokio::test]
    async fn test_unplug_ends_session() {
        let (backend, manager) = manager().await;
        let mut evictions = manager.subscribe_evictions();
        let session = manager
            .ensure_session("D1", &depth_request(60), Some("v1"))
            .await
            .unwrap();
        backend.unplug("D1");

        let eviction = tokio::time::timeout(Duration::from_secs(2), evictions.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(eviction.viewers, vec!["v1"]);
        assert_eq!(eviction.reason, "device lost");
        assert!(!session.is_active());
    }

    #[tokio::test]
    async fn test_device_removal_keeps_slot() {
        let (_backend, manager) = manager().await;
        manager
            .ensure_session("D1", &depth_request(30), Some("v1"))
            .await
            .unwrap();
        let slot = manager.slot("D1");

        assert_eq!(manager.on_device_removed("D1").await, vec!["v1"]);
        assert!(manager.session("D1").is_none());
        assert!(Arc::ptr_eq(&slot, &manager.slot("D1")));

        let session = manager
            .ensure_session("D1", &depth_request(30), Some("v2"))
            .await
            .unwrap();
        assert!(slot.is_current(&session));
        assert_eq!(manager.slots.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_status() {
        let (_backend, manager) = manager().await;
        assert!(!manager.status("D1").unwrap().is_streaming);
        assert!(matches!(manager.status("D9"), Err(AppError::NotFound(_))));
        manager
            .ensure_session("D1", &depth_request(30), Some("v1"))
            .await
            .unwrap();
        let status = manager.status("D1").unwrap();
        assert!(status.is_streaming);
        assert_eq!(status.subscribers, 1);
        assert_eq!(manager.list_status().len(), 1);
    }
}
