//! Peer session manager
//!
//! Binds viewers to capture sessions. An offer attaches the viewer to the
//! device's capture session (starting it if needed), creates a transport,
//! registers it with the frame distributor and runs the SDP handshake under
//! a deadline. Every teardown path goes through [`PeerSessionManager::close_session`],
//! which applies the state transition first so concurrent teardowns of the
//! same session run once.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::session::{PeerEvent, PeerSession, PeerSessionInfo, PeerState};
use super::signaling::{
    ConnectionState, IceCandidate, SdpAnswer, SdpOffer, SignalingChannel, SignalingError,
    SignalingMessage,
};
use super::transport::{Negotiator, PeerTransport, TransportSink};
use crate::capture::{CaptureManager, Eviction};
use crate::config::SessionSettings;
use crate::error::{AppError, Result};
use crate::events::{EventBus, SystemEvent};

/// Peer session limits and deadlines
#[derive(Debug, Clone)]
pub struct PeerSettings {
    /// Deadline from offer to connected transport
    pub handshake_timeout: Duration,
    /// Sessions without activity for this long are evicted
    pub stale_timeout: Duration,
    pub max_sessions: usize,
}

impl Default for PeerSettings {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(10),
            stale_timeout: Duration::from_secs(30),
            max_sessions: 16,
        }
    }
}

impl From<&SessionSettings> for PeerSettings {
    fn from(settings: &SessionSettings) -> Self {
        Self {
            handshake_timeout: Duration::from_millis(settings.handshake_timeout_ms),
            stale_timeout: Duration::from_secs(settings.stale_timeout_secs),
            max_sessions: settings.max_peer_sessions,
        }
    }
}

/// Manager of viewer sessions
pub struct PeerSessionManager {
    capture: Arc<CaptureManager>,
    negotiator: Arc<dyn Negotiator>,
    signaling: Arc<dyn SignalingChannel>,
    events: Arc<EventBus>,
    settings: PeerSettings,
    sessions: RwLock<HashMap<String, Arc<PeerSession>>>,
    offer_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl PeerSessionManager {
    pub fn new(
        capture: Arc<CaptureManager>,
        negotiator: Arc<dyn Negotiator>,
        signaling: Arc<dyn SignalingChannel>,
        events: Arc<EventBus>,
        settings: PeerSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            capture,
            negotiator,
            signaling,
            events,
            settings,
            sessions: RwLock::new(HashMap::new()),
            offer_locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn settings(&self) -> &PeerSettings {
        &self.settings
    }

    pub fn capture(&self) -> &Arc<CaptureManager> {
        &self.capture
    }

    /// Handle a viewer's SDP offer and return the answer
    ///
    /// An offer without enabled streams joins the device's running
    /// session. A live session of the same viewer is replaced. Offers of
    /// one viewer are handled one at a time.
    pub async fn on_offer(self: &Arc<Self>, viewer_id: &str, offer: SdpOffer) -> Result<SdpAnswer> {
        let lock = self.offer_lock(viewer_id);
        let result = {
            let _guard = lock.lock().await;
            self.offer_locked(viewer_id, offer).await
        };
        drop(lock);
        self.prune_offer_lock(viewer_id);
        result
    }

    async fn offer_locked(self: &Arc<Self>, viewer_id: &str, offer: SdpOffer) -> Result<SdpAnswer> {
        let deadline = Instant::now() + self.settings.handshake_timeout;
        let registry = self.capture.registry();
        registry.get_device(&offer.device_id)?;
        registry.validate_request(&offer.device_id, &offer.stream)?;

        if let Some(previous) = self.get_session(viewer_id) {
            info!("Viewer {} sent a new offer, replacing its session", viewer_id);
            self.close_session(&previous, "replaced").await;
        } else if self.session_count() >= self.settings.max_sessions {
            return Err(self.limit_error());
        }

        let capture = self
            .capture
            .ensure_session(&offer.device_id, &offer.stream, Some(viewer_id))
            .await?;

        let session = Arc::new(PeerSession::new(viewer_id, capture.clone()));
        let inserted = {
            let mut sessions = self.sessions.write();
            if !sessions.contains_key(viewer_id) && sessions.len() >= self.settings.max_sessions {
                None
            } else {
                Some(sessions.insert(viewer_id.to_string(), session.clone()))
            }
        };
        let displaced = match inserted {
            Some(displaced) => displaced,
            None => {
                // lost the last slot to a concurrent offer
                self.capture.remove_subscriber(&capture, viewer_id).await;
                return Err(self.limit_error());
            }
        };
        if let Some(displaced) = displaced {
            warn!("Peer session of {} displaced without teardown", viewer_id);
            self.retire(&displaced, "displaced").await;
        }
        self.publish_state(&session);
        info!(
            "Peer session for {} negotiating on {} (capture {})",
            viewer_id,
            offer.device_id,
            capture.id()
        );

        match self.negotiate(&session, &offer.sdp, deadline).await {
            Ok((transport, answer)) => {
                if transport.state() == ConnectionState::Connected {
                    self.mark_connected(&session).await;
                } else {
                    self.watch_connection(session, transport, deadline);
                }
                Ok(answer)
            }
            Err(e) => {
                warn!("Negotiation with {} failed: {}", viewer_id, e);
                self.fail_session(&session, &e.to_string()).await;
                Err(e)
            }
        }
    }

    fn limit_error(&self) -> AppError {
        AppError::BadRequest(format!(
            "maximum peer sessions ({}) reached",
            self.settings.max_sessions
        ))
    }

    fn offer_lock(&self, viewer_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.offer_locks
            .lock()
            .entry(viewer_id.to_string())
            .or_default()
            .clone()
    }

    /// Forget a viewer's offer lock once nobody holds or waits on it
    fn prune_offer_lock(&self, viewer_id: &str) {
        let mut locks = self.offer_locks.lock();
        if locks
            .get(viewer_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(viewer_id);
        }
    }

    /// Close a session that is no longer in the map. Its viewer id now
    /// belongs to another session, so the subscriptions are left alone.
    async fn retire(&self, session: &Arc<PeerSession>, reason: &str) {
        if session.transition(PeerEvent::Close).is_none() {
            return;
        }
        if let Some(transport) = session.take_transport() {
            transport.close().await;
        }
        debug!("Retired peer session of {} ({})", session.viewer_id(), reason);
        self.publish_state(session);
    }

    async fn negotiate(
        self: &Arc<Self>,
        session: &Arc<PeerSession>,
        sdp: &str,
        deadline: Instant,
    ) -> Result<(Arc<dyn PeerTransport>, SdpAnswer)> {
        let viewer_id = session.viewer_id();

        let (candidate_tx, candidate_rx) = mpsc::unbounded_channel();
        let transport = tokio::time::timeout_at(
            deadline,
            self.negotiator.create(viewer_id, candidate_tx),
        )
        .await
        .map_err(|_| AppError::NegotiationTimeout(viewer_id.to_string()))??;
        session.set_transport(transport.clone());
        if session.state().is_terminal() {
            // closed by an eviction while the transport was being created
            if let Some(transport) = session.take_transport() {
                transport.close().await;
            }
            return Err(AppError::NotFound(format!(
                "peer session for {} closed during negotiation",
                viewer_id
            )));
        }
        self.spawn_candidate_forwarder(session, candidate_rx);

        self.capture.distributor().subscribe(
            session.capture_session_id(),
            viewer_id,
            Arc::new(TransportSink(transport.clone())),
        )?;

        let answer = tokio::time::timeout_at(deadline, transport.handle_offer(sdp))
            .await
            .map_err(|_| AppError::NegotiationTimeout(viewer_id.to_string()))?
            .map_err(|e| match e {
                e @ AppError::NegotiationFailed(_) => e,
                other => AppError::NegotiationFailed(other.to_string()),
            })?;

        Ok((transport, answer))
    }

    /// Trickle local candidates to the viewer until the transport goes away
    fn spawn_candidate_forwarder(
        &self,
        session: &Arc<PeerSession>,
        mut candidates: mpsc::UnboundedReceiver<IceCandidate>,
    ) {
        let signaling = self.signaling.clone();
        let session = Arc::downgrade(session);
        tokio::spawn(async move {
            while let Some(candidate) = candidates.recv().await {
                let Some(session) = session.upgrade() else {
                    break;
                };
                if session.state().is_terminal() {
                    break;
                }
                let viewer_id = session.viewer_id().to_string();
                if let Err(e) = signaling
                    .send(&viewer_id, SignalingMessage::Candidate(candidate))
                    .await
                {
                    debug!("Could not trickle candidate to {}: {}", viewer_id, e);
                }
            }
        });
    }

    /// Move to Connected when the transport connects, fail the session
    /// when it dies or the deadline passes first
    fn watch_connection(
        self: &Arc<Self>,
        session: Arc<PeerSession>,
        transport: Arc<dyn PeerTransport>,
        deadline: Instant,
    ) {
        let manager = Arc::downgrade(self);
        let mut state_rx = transport.state_watch();
        tokio::spawn(async move {
            let outcome = tokio::time::timeout_at(deadline, async {
                loop {
                    let state = *state_rx.borrow_and_update();
                    if state == ConnectionState::Connected || state.is_dead() {
                        return Some(state);
                    }
                    if state_rx.changed().await.is_err() {
                        return None;
                    }
                }
            })
            .await;

            let Some(manager) = manager.upgrade() else {
                return;
            };
            match outcome {
                Ok(Some(ConnectionState::Connected)) => manager.mark_connected(&session).await,
                Ok(Some(state)) => {
                    manager
                        .fail_session(&session, &format!("transport {}", state))
                        .await;
                }
                Ok(None) => {
                    manager.fail_session(&session, "transport dropped").await;
                }
                Err(_) => {
                    if session.state() == PeerState::Negotiating {
                        warn!(
                            "Peer session for {} did not connect within {:?}",
                            session.viewer_id(),
                            manager.settings.handshake_timeout
                        );
                        let err =
                            AppError::NegotiationTimeout(session.viewer_id().to_string());
                        manager
                            .notify(
                                session.viewer_id(),
                                SignalingMessage::Error(SignalingError::from(&err)),
                            )
                            .await;
                        manager.fail_session(&session, &err.to_string()).await;
                    }
                }
            }
        });
    }

    async fn mark_connected(&self, session: &Arc<PeerSession>) {
        if session.transition(PeerEvent::Connected).is_none() {
            return;
        }
        session.touch();
        info!("Peer session for {} connected", session.viewer_id());
        self.publish_state(session);
        self.notify(
            session.viewer_id(),
            SignalingMessage::State {
                state: ConnectionState::Connected,
            },
        )
        .await;
    }

    /// Forward a remote ICE candidate to the viewer's transport
    pub async fn on_ice_candidate(&self, viewer_id: &str, candidate: IceCandidate) -> Result<()> {
        let session = self.require_session(viewer_id)?;
        if session.state().is_terminal() {
            debug!(
                "Ignoring ICE candidate for {} in state {}",
                viewer_id,
                session.state()
            );
            return Ok(());
        }
        session.touch();
        match session.transport() {
            Some(transport) => transport.add_ice_candidate(candidate).await,
            None => {
                debug!("Ignoring ICE candidate for {}: no transport yet", viewer_id);
                Ok(())
            }
        }
    }

    /// Viewer went away; idempotent
    pub async fn on_disconnect(&self, viewer_id: &str) {
        if let Some(session) = self.get_session(viewer_id) {
            self.close_session(&session, "disconnected").await;
        }
    }

    /// Refresh the viewer's last activity
    pub fn keepalive(&self, viewer_id: &str) -> Result<()> {
        self.require_session(viewer_id)?.touch();
        Ok(())
    }

    /// Single entry point for client-originated signaling messages
    pub async fn handle_signal(self: &Arc<Self>, viewer_id: &str, message: SignalingMessage) {
        debug!("Signal '{}' from {}", message.kind(), viewer_id);
        let reply = match message {
            SignalingMessage::Offer(offer) => match self.on_offer(viewer_id, offer).await {
                Ok(answer) => Some(SignalingMessage::Answer(answer)),
                Err(e) => Some(SignalingMessage::Error(SignalingError::from(&e))),
            },
            SignalingMessage::Candidate(candidate) => self
                .on_ice_candidate(viewer_id, candidate)
                .await
                .err()
                .map(|e| SignalingMessage::Error(SignalingError::from(&e))),
            SignalingMessage::Keepalive => self
                .keepalive(viewer_id)
                .err()
                .map(|e| SignalingMessage::Error(SignalingError::from(&e))),
            SignalingMessage::Close => {
                self.on_disconnect(viewer_id).await;
                None
            }
            other => {
                let err = AppError::BadRequest(format!(
                    "unexpected '{}' message from viewer",
                    other.kind()
                ));
                Some(SignalingMessage::Error(SignalingError::from(&err)))
            }
        };

        if let Some(reply) = reply {
            self.notify(viewer_id, reply).await;
        }
    }

    /// Administrative stop; evicted viewers are closed right away
    pub async fn stop_capture(&self, device_id: &str) -> Result<Vec<String>> {
        let evicted = self.capture.stop(device_id).await?;
        for viewer_id in &evicted {
            if let Some(session) = self.get_session(viewer_id) {
                if session.device_id() == device_id {
                    self.close_session(&session, "capture stopped").await;
                }
            }
        }
        Ok(evicted)
    }

    /// Close the peer sessions cut off by an ended capture session
    pub async fn on_eviction(&self, eviction: &Eviction) {
        for viewer_id in &eviction.viewers {
            let Some(session) = self.get_session(viewer_id) else {
                continue;
            };
            if session.capture_session_id() == eviction.session_id {
                self.close_session(&session, &eviction.reason).await;
            }
        }
    }

    /// Tear down a session; returns false if another path already did
    pub async fn close_session(&self, session: &Arc<PeerSession>, reason: &str) -> bool {
        self.teardown(session, PeerEvent::Close, reason).await
    }

    async fn fail_session(&self, session: &Arc<PeerSession>, reason: &str) -> bool {
        self.teardown(session, PeerEvent::Fail, reason).await
    }

    async fn teardown(&self, session: &Arc<PeerSession>, event: PeerEvent, reason: &str) -> bool {
        let Some(state) = session.transition(event) else {
            return false;
        };
        let viewer_id = session.viewer_id();
        info!(
            "Peer session for {} on {} {} ({})",
            viewer_id,
            session.device_id(),
            state,
            reason
        );

        {
            let mut sessions = self.sessions.write();
            if sessions
                .get(viewer_id)
                .is_some_and(|s| Arc::ptr_eq(s, session))
            {
                sessions.remove(viewer_id);
            }
        }

        if let Some(stats) = self.capture.distributor().unsubscribe(viewer_id) {
            debug!(
                "Viewer {} received {} frames ({} dropped, {} failed)",
                viewer_id, stats.delivered, stats.dropped, stats.failed
            );
        }
        self.capture
            .remove_subscriber(session.capture(), viewer_id)
            .await;
        if let Some(transport) = session.take_transport() {
            transport.close().await;
        }

        self.publish_state(session);
        true
    }

    /// Sessions the cleanup loop should evict, with the reason
    ///
    /// A connected transport counts as activity; only sessions that never
    /// connected age out through the stale timeout.
    pub fn expiry_reason(&self, session: &PeerSession) -> Option<&'static str> {
        if session.state().is_terminal() {
            return None;
        }
        let transport_state = session.transport().map(|t| t.state());
        if transport_state.is_some_and(|state| state.is_dead()) {
            return Some("transport lost");
        }
        let connected = transport_state == Some(ConnectionState::Connected);
        if !connected && session.idle_for() > self.settings.stale_timeout {
            return Some("stale");
        }
        if !self.capture.is_live(session.capture()) {
            return Some("capture ended");
        }
        None
    }

    /// Close every session (process shutdown)
    pub async fn close_all(&self) {
        for session in self.sessions() {
            self.close_session(&session, "shutdown").await;
        }
    }

    /// Feed viewer disconnects from the signaling layer
    pub async fn run_disconnect_listener(self: Arc<Self>, mut disconnects: mpsc::UnboundedReceiver<String>) {
        while let Some(viewer_id) = disconnects.recv().await {
            debug!("Signaling channel of {} closed", viewer_id);
            self.on_disconnect(&viewer_id).await;
        }
    }

    /// Close peer sessions whose capture session ended
    pub async fn run_eviction_listener(self: Arc<Self>, cancel: CancellationToken) {
        let mut evictions = self.capture.subscribe_evictions();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                eviction = evictions.recv() => match eviction {
                    Ok(eviction) => self.on_eviction(&eviction).await,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Eviction listener lagged by {} notices", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    pub fn get_session(&self, viewer_id: &str) -> Option<Arc<PeerSession>> {
        self.sessions.read().get(viewer_id).cloned()
    }

    fn require_session(&self, viewer_id: &str) -> Result<Arc<PeerSession>> {
        self.get_session(viewer_id)
            .ok_or_else(|| AppError::NotFound(format!("no peer session for viewer {}", viewer_id)))
    }

    pub fn sessions(&self) -> Vec<Arc<PeerSession>> {
        self.sessions.read().values().cloned().collect()
    }

    pub fn list_sessions(&self) -> Vec<PeerSessionInfo> {
        let mut list: Vec<PeerSessionInfo> =
            self.sessions.read().values().map(|s| s.info()).collect();
        list.sort_by(|a, b| a.viewer_id.cmp(&b.viewer_id));
        list
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    fn publish_state(&self, session: &PeerSession) {
        self.events.publish(SystemEvent::PeerStateChanged {
            viewer_id: session.viewer_id().to_string(),
            device_id: session.device_id().to_string(),
            state: session.state().to_string(),
            timestamp: chrono::Utc::now(),
        });
    }

    async fn notify(&self, viewer_id: &str, message: SignalingMessage) {
        if let Err(e) = self.signaling.send(viewer_id, message).await {
            debug!("Viewer {} unreachable: {}", viewer_id, e);
        }
    }
}
