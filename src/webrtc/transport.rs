//! Negotiation layer seam
//!
//! A [`PeerTransport`] is one viewer's real-time connection. It answers the
//! viewer's SDP offer, accepts remote ICE candidates, reports its connection
//! state and carries frames (it is a [`FrameSink`]). A [`Negotiator`]
//! creates transports; production uses the webrtc-rs implementation in
//! [`super::peer`], tests plug in an in-memory one.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

use super::signaling::{ConnectionState, IceCandidate, SdpAnswer};
use crate::capture::{Frame, FrameSink};
use crate::error::Result;

/// One viewer's media transport
#[async_trait]
pub trait PeerTransport: FrameSink {
    /// Apply the remote offer and produce the local answer
    async fn handle_offer(&self, sdp: &str) -> Result<SdpAnswer>;

    /// Add a remote ICE candidate
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    /// Connection state updates
    fn state_watch(&self) -> watch::Receiver<ConnectionState>;

    fn state(&self) -> ConnectionState {
        *self.state_watch().borrow()
    }

    /// Close the transport. Must be safe to call more than once.
    async fn close(&self);
}

/// Factory of peer transports
#[async_trait]
pub trait Negotiator: Send + Sync {
    /// Create a transport for a viewer
    ///
    /// Local ICE candidates discovered after creation are pushed into
    /// `local_candidates` so they can be trickled to the viewer.
    async fn create(
        &self,
        viewer_id: &str,
        local_candidates: mpsc::UnboundedSender<IceCandidate>,
    ) -> Result<Arc<dyn PeerTransport>>;
}

/// Adapts a transport to the distributor's sink interface
pub(crate) struct TransportSink(pub Arc<dyn PeerTransport>);

#[async_trait]
impl FrameSink for TransportSink {
    async fn send_frame(&self, frame: &Frame) -> Result<()> {
        self.0.send_frame(frame).await
    }
}
