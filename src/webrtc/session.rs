//! Peer session state
//!
//! One viewer's connection to one device. The state machine is
//!
//! ```text
//! Negotiating --connected--> Connected --close--> Closed
//!      |                                            ^
//!      +------------------close---------------------+
//!      +--fail--> Failed
//! ```
//!
//! `Closed` and `Failed` are terminal. Transitions are atomic, so when
//! several paths race to tear a session down only the first one wins.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::signaling::ConnectionState;
use super::transport::PeerTransport;
use crate::capture::CaptureSession;

/// Negotiation/lifecycle state of a peer session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerState {
    Negotiating,
    Connected,
    Closed,
    Failed,
}

impl PeerState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PeerState::Closed | PeerState::Failed)
    }
}

impl std::fmt::Display for PeerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PeerState::Negotiating => write!(f, "negotiating"),
            PeerState::Connected => write!(f, "connected"),
            PeerState::Closed => write!(f, "closed"),
            PeerState::Failed => write!(f, "failed"),
        }
    }
}

/// Inputs of the peer state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerEvent {
    /// Transport reached the connected state
    Connected,
    /// Handshake error or deadline missed
    Fail,
    /// Disconnect, eviction or replacement
    Close,
}

impl PeerState {
    /// Next state for an event, `None` when the transition is not allowed
    pub fn next(self, event: PeerEvent) -> Option<PeerState> {
        match (self, event) {
            (PeerState::Negotiating, PeerEvent::Connected) => Some(PeerState::Connected),
            (PeerState::Negotiating, PeerEvent::Fail) => Some(PeerState::Failed),
            (PeerState::Negotiating | PeerState::Connected, PeerEvent::Close) => {
                Some(PeerState::Closed)
            }
            _ => None,
        }
    }
}

/// A viewer's live connection
pub struct PeerSession {
    viewer_id: String,
    device_id: String,
    capture: Arc<CaptureSession>,
    state: Mutex<PeerState>,
    created_at: DateTime<Utc>,
    last_activity: Mutex<Instant>,
    transport: Mutex<Option<Arc<dyn PeerTransport>>>,
}

impl PeerSession {
    pub(crate) fn new(viewer_id: &str, capture: Arc<CaptureSession>) -> Self {
        Self {
            viewer_id: viewer_id.to_string(),
            device_id: capture.device_id().to_string(),
            capture,
            state: Mutex::new(PeerState::Negotiating),
            created_at: Utc::now(),
            last_activity: Mutex::new(Instant::now()),
            transport: Mutex::new(None),
        }
    }

    pub fn viewer_id(&self) -> &str {
        &self.viewer_id
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn capture_session_id(&self) -> &str {
        self.capture.id()
    }

    pub fn capture(&self) -> &Arc<CaptureSession> {
        &self.capture
    }

    pub fn state(&self) -> PeerState {
        *self.state.lock()
    }

    /// Apply an event; returns the new state if the transition happened
    pub fn transition(&self, event: PeerEvent) -> Option<PeerState> {
        let mut state = self.state.lock();
        let next = state.next(event)?;
        *state = next;
        Some(next)
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    pub fn transport(&self) -> Option<Arc<dyn PeerTransport>> {
        self.transport.lock().clone()
    }

    pub(crate) fn set_transport(&self, transport: Arc<dyn PeerTransport>) {
        *self.transport.lock() = Some(transport);
    }

    pub(crate) fn take_transport(&self) -> Option<Arc<dyn PeerTransport>> {
        self.transport.lock().take()
    }

    pub fn info(&self) -> PeerSessionInfo {
        PeerSessionInfo {
            viewer_id: self.viewer_id.clone(),
            device_id: self.device_id.clone(),
            capture_session_id: self.capture.id().to_string(),
            state: self.state(),
            transport_state: self.transport().map(|t| t.state()),
            created_at: self.created_at,
            idle_secs: self.idle_for().as_secs_f64(),
        }
    }
}

impl std::fmt::Debug for PeerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerSession")
            .field("viewer_id", &self.viewer_id)
            .field("device_id", &self.device_id)
            .field("capture_session_id", &self.capture.id())
            .field("state", &self.state())
            .finish()
    }
}

/// Peer session snapshot for listings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerSessionInfo {
    pub viewer_id: String,
    pub device_id: String,
    pub capture_session_id: String,
    pub state: PeerState,
    pub transport_state: Option<ConnectionState>,
    pub created_at: DateTime<Utc>,
    pub idle_secs: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions() {
        use PeerEvent::*;
        use PeerState::*;

        assert_eq!(Negotiating.next(PeerEvent::Connected), Some(PeerState::Connected));
        assert_eq!(Negotiating.next(Fail), Some(Failed));
        assert_eq!(Negotiating.next(Close), Some(Closed));
        assert_eq!(PeerState::Connected.next(Close), Some(Closed));

        // connected sessions are closed, never failed
        assert_eq!(PeerState::Connected.next(Fail), None);
        assert_eq!(PeerState::Connected.next(PeerEvent::Connected), None);

        for terminal in [Closed, Failed] {
            assert!(terminal.is_terminal());
            for event in [PeerEvent::Connected, Fail, Close] {
                assert_eq!(terminal.next(event), None);
            }
        }
    }

    #[test]
    fn test_state_serialization() {
        assert_eq!(
            serde_json::to_string(&PeerState::Negotiating).unwrap(),
            "\"negotiating\""
        );
        assert_eq!(PeerState::Failed.to_string(), "failed");
    }
}
