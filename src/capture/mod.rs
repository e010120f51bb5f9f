//! Capture sessions and frame fan-out
//!
//! A device streams through at most one [`CaptureSession`] at a time. The
//! [`CaptureManager`] starts and stops sessions under a per-device lock,
//! and the [`FrameDistributor`] hands frames to every subscribed viewer
//! through a bounded, drop-oldest ring.

pub mod distributor;
pub mod frame;
pub mod manager;
pub mod session;

pub use distributor::{
    FrameDistributor, FramePublisher, FrameSink, DEFAULT_FRAME_QUEUE_DEPTH,
};
pub use frame::{Frame, FrameKind, DEFAULT_CHUNK_PAYLOAD, FRAME_HEADER_LEN};
pub use manager::{CaptureManager, Eviction};
pub use session::{CaptureSession, CaptureState};
