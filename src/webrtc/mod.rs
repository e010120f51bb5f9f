//! Viewer sessions over WebRTC
//!
//! Architecture:
//! ```text
//! Viewer --offer/candidates--> SignalingChannel --> PeerSessionManager
//!                                                        |
//!                                    ensure_session ---> CaptureManager
//!                                                        |
//!                          Negotiator::create --> PeerTransport (RTCPeerConnection)
//!                                                        ^
//!                 FrameDistributor ring --frames---------+--> data channels
//! ```
//! The [`CleanupLoop`] evicts stale viewers and releases idle capture
//! sessions in the background.

pub mod cleanup;
pub mod config;
pub mod manager;
pub mod peer;
pub mod session;
pub mod signaling;
pub mod transport;

pub use cleanup::{CleanupLoop, CleanupReport};
pub use config::{IceServerInfo, TurnServer, WebRtcConfig};
pub use manager::{PeerSessionManager, PeerSettings};
pub use peer::{PeerConnection, WebRtcNegotiator};
pub use session::{PeerEvent, PeerSession, PeerSessionInfo, PeerState};
pub use signaling::{
    AnswerResponse, ConnectionState, IceCandidate, IceCandidateRequest, NullSignaling,
    OfferRequest, SdpAnswer, SdpOffer, SignalingChannel, SignalingError, SignalingMessage,
};
pub use transport::{Negotiator, PeerTransport};
