//! Hardware backend trait definition
//!
//! The backend is the only source of truth for device metadata, stream
//! profiles and option values. Its methods block, so async callers run them
//! through `tokio::task::spawn_blocking`.

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};

use super::types::{DeviceInfo, OptionValue, SensorInfo, StreamRequest};
use crate::capture::Frame;
use crate::error::Result;

/// Capacity of the channel between a backend capture thread and the pump
pub const FRAME_STREAM_CAPACITY: usize = 8;

/// Backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    /// RealSense UVC nodes through V4L2
    #[default]
    V4l2,
    /// Deterministic test-pattern devices
    Synthetic,
}

impl std::str::FromStr for BackendType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "v4l2" => Ok(Self::V4l2),
            "synthetic" | "fake" => Ok(Self::Synthetic),
            _ => Err(format!("Unknown backend: {}", s)),
        }
    }
}

/// Everything the backend knows about a device at enumeration time
#[derive(Debug, Clone)]
pub struct DeviceDescriptor {
    pub info: DeviceInfo,
    pub sensors: Vec<SensorInfo>,
}

/// Proof of exclusive access to a device
///
/// Deliberately not `Clone`: exactly one owner may release it.
#[derive(Debug, PartialEq, Eq)]
pub struct ClaimHandle {
    pub device_id: String,
    pub token: u64,
}

/// Receiving end of a running capture pipeline
///
/// The stream ends (returns `None`) when the pipeline stops or the device
/// disappears.
pub struct FrameStream {
    rx: mpsc::Receiver<Frame>,
}

impl FrameStream {
    /// Create a stream and the sender a capture thread pushes into
    pub fn channel() -> (mpsc::Sender<Frame>, Self) {
        let (tx, rx) = mpsc::channel(FRAME_STREAM_CAPACITY);
        (tx, Self { rx })
    }

    pub async fn next(&mut self) -> Option<Frame> {
        self.rx.recv().await
    }
}

/// Device arrival or removal reported by the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HotplugEvent {
    Added(String),
    Removed(String),
}

/// Hardware backend trait
pub trait HardwareBackend: Send + Sync {
    /// Backend name for logging
    fn name(&self) -> &'static str;

    /// Scan for devices
    fn enumerate(&self) -> Result<Vec<DeviceDescriptor>>;

    /// Take exclusive ownership of a device; `DeviceBusy` if someone else has it
    fn claim(&self, device_id: &str) -> Result<ClaimHandle>;

    /// Apply a stream request; `Unsupported` if the hardware refuses it
    fn configure(&self, handle: &ClaimHandle, request: &StreamRequest) -> Result<()>;

    /// Start the configured pipeline
    fn start(&self, handle: &ClaimHandle) -> Result<FrameStream>;

    /// Stop the pipeline; the frame stream ends shortly after
    fn stop(&self, handle: &ClaimHandle) -> Result<()>;

    /// Give the device back
    fn release(&self, handle: ClaimHandle);

    /// Read the live value of an option
    fn read_option(&self, device_id: &str, sensor_id: &str, option_id: &str)
        -> Result<OptionValue>;

    /// Write an option value (already validated)
    fn write_option(
        &self,
        device_id: &str,
        sensor_id: &str,
        option_id: &str,
        value: &OptionValue,
    ) -> Result<()>;

    /// Start or stop point cloud output on a running pipeline
    fn set_point_cloud(&self, handle: &ClaimHandle, enabled: bool) -> Result<()>;

    /// Subscribe to hotplug events, if the backend can report them
    fn hotplug(&self) -> Option<broadcast::Receiver<HotplugEvent>> {
        None
    }
}
