use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::capture::{CaptureManager, FrameDistributor};
use crate::config::ConfigStore;
use crate::device::{DeviceInfo, DeviceRegistry, HardwareBackend, HotplugEvent};
use crate::error::Result;
use crate::events::{EventBus, SystemEvent};
use crate::web::SignalingHub;
use crate::webrtc::{
    CleanupLoop, Negotiator, PeerSessionManager, PeerSettings, SignalingChannel, WebRtcConfig,
};

/// Application-wide state shared across handlers
///
/// Built once in `main` (or per test) and passed around; there are no
/// process-wide singletons.
pub struct AppState {
    /// Configuration store
    pub config: ConfigStore,
    /// Event bus for real-time notifications
    pub events: Arc<EventBus>,
    /// Discovered devices and their options
    pub registry: Arc<DeviceRegistry>,
    /// Per-device capture sessions
    pub capture: Arc<CaptureManager>,
    /// Viewer sessions
    pub peers: Arc<PeerSessionManager>,
    /// Connected signaling sockets
    pub signaling: Arc<SignalingHub>,
    /// ICE servers handed to viewers
    pub webrtc: WebRtcConfig,
    /// Cancels every background task
    pub shutdown: CancellationToken,
    disconnects: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
}

impl AppState {
    /// Wire the core together
    pub fn new(
        config: ConfigStore,
        backend: Arc<dyn HardwareBackend>,
        negotiator: Arc<dyn Negotiator>,
    ) -> Arc<Self> {
        let settings = config.get();
        let events = Arc::new(EventBus::new());
        let (hub, disconnects) = SignalingHub::new();
        let signaling = Arc::new(hub);

        let registry = Arc::new(DeviceRegistry::new(backend, events.clone()));
        let distributor = Arc::new(FrameDistributor::new(settings.session.frame_queue_depth));
        let capture = CaptureManager::new(
            registry.clone(),
            distributor,
            events.clone(),
            signaling.clone(),
        );
        let peers = PeerSessionManager::new(
            capture.clone(),
            negotiator,
            signaling.clone(),
            events.clone(),
            PeerSettings::from(&settings.session),
        );

        Arc::new(Self {
            webrtc: WebRtcConfig::from_settings(&settings.webrtc),
            config,
            events,
            registry,
            capture,
            peers,
            signaling,
            shutdown: CancellationToken::new(),
            disconnects: Mutex::new(Some(disconnects)),
        })
    }

    /// Start the cleanup loop, hotplug watcher and listeners
    ///
    /// Only the first call has an effect.
    pub fn spawn_background_tasks(self: &Arc<Self>) {
        let Some(disconnects) = self.disconnects.lock().take() else {
            return;
        };

        tokio::spawn(self.peers.clone().run_disconnect_listener(disconnects));
        tokio::spawn(
            self.peers
                .clone()
                .run_eviction_listener(self.shutdown.clone()),
        );

        let interval = Duration::from_secs(self.config.get().session.cleanup_interval_secs);
        let cleanup = CleanupLoop::new(
            self.peers.clone(),
            self.capture.clone(),
            self.events.clone(),
            interval,
        );
        tokio::spawn(cleanup.run(self.shutdown.clone()));

        self.spawn_event_forwarder();
        self.spawn_hotplug_watcher();
    }

    /// Push every system event to the signaling sockets
    fn spawn_event_forwarder(self: &Arc<Self>) {
        let mut rx = self.events.subscribe();
        let signaling = self.signaling.clone();
        let cancel = self.shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = rx.recv() => match event {
                        Ok(event) => signaling.broadcast(event).await,
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!("Event forwarder lagged by {} events", n);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        });
    }

    /// React to backend hotplug events
    ///
    /// Removal drops the registry entry and stops the device's capture
    /// session; arrival triggers a rediscovery.
    pub fn spawn_hotplug_watcher(self: &Arc<Self>) {
        let Some(mut rx) = self.registry.backend().hotplug() else {
            info!(
                "Backend {} reports no hotplug events, use POST /api/devices/refresh",
                self.registry.backend().name()
            );
            return;
        };

        let state = self.clone();
        let cancel = self.shutdown.clone();
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = rx.recv() => event,
                };
                match event {
                    Ok(HotplugEvent::Removed(device_id)) => {
                        info!("Device {} unplugged", device_id);
                        if state.registry.invalidate(&device_id).is_some() {
                            state.events.publish(SystemEvent::DeviceLost {
                                device_id: device_id.clone(),
                                reason: "unplugged".to_string(),
                            });
                        }
                        state.capture.on_device_removed(&device_id).await;
                    }
                    Ok(HotplugEvent::Added(device_id)) => {
                        info!("Device {} plugged in", device_id);
                        if let Err(e) = state.registry.discover().await {
                            warn!("Rediscovery after hotplug failed: {}", e);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Hotplug watcher missed {} events, rediscovering", n);
                        if let Err(e) = state.refresh_devices().await {
                            warn!("Rediscovery failed: {}", e);
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    /// Rediscover devices; sessions of vanished devices are stopped
    pub async fn refresh_devices(&self) -> Result<Vec<DeviceInfo>> {
        let before: HashSet<String> = self
            .registry
            .list_devices()
            .into_iter()
            .map(|d| d.device_id)
            .collect();
        let devices = self.registry.discover().await?;
        for device_id in before {
            if !devices.iter().any(|d| d.device_id == device_id) {
                self.capture.on_device_removed(&device_id).await;
            }
        }
        Ok(devices)
    }

    /// Stop background tasks and release everything
    pub async fn shutdown(&self) {
        info!("Shutting down sessions");
        self.shutdown.cancel();
        self.peers.close_all().await;
        self.capture.shutdown().await;
    }
}
