//! Camera device layer
//!
//! This module contains:
//! - Stream types, formats and resolutions
//! - Device, sensor and option metadata with option validation
//! - The hardware backend trait and its V4L2 and synthetic implementations
//! - The device registry

pub mod backend;
pub mod format;
pub mod registry;
pub mod synthetic;
pub mod types;
pub mod v4l2;

pub use backend::{
    BackendType, ClaimHandle, DeviceDescriptor, FrameStream, HardwareBackend, HotplugEvent,
};
pub use format::{Resolution, StreamFormat, StreamType};
pub use registry::DeviceRegistry;
pub use synthetic::{SyntheticBackend, SyntheticDeviceSpec};
pub use types::{
    DeviceInfo, OptionInfo, OptionKind, OptionValue, PointCloudStatus, SensorInfo, StreamConfig,
    StreamProfile, StreamRequest, StreamStatus,
};
pub use v4l2::V4l2Backend;

use std::sync::Arc;

use crate::error::{AppError, Result};

/// Run a blocking hardware call on the blocking pool
pub(crate) async fn run_blocking<F, R>(f: F) -> Result<R>
where
    F: FnOnce() -> Result<R> + Send + 'static,
    R: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AppError::Internal(format!("blocking task failed: {}", e)))?
}

/// Build the configured backend
pub fn create_backend(backend: BackendType, synthetic_devices: usize) -> Arc<dyn HardwareBackend> {
    match backend {
        BackendType::V4l2 => Arc::new(V4l2Backend::new()),
        BackendType::Synthetic => Arc::new(SyntheticBackend::new(synthetic_devices)),
    }
}
