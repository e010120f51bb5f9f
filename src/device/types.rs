//! Device, sensor, option and stream configuration types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::format::{Resolution, StreamFormat, StreamType};
use crate::error::{AppError, Result};

/// Tolerance used when checking numeric option values against their step
const STEP_EPSILON: f64 = 1e-6;

/// Information about a camera device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Stable device identifier
    pub device_id: String,
    /// Product name reported by the device
    pub name: String,
    pub serial_number: String,
    pub firmware_version: String,
    /// USB port path (bus info)
    pub physical_port: String,
    /// USB connection type, e.g. "3.2"
    pub usb_type: String,
    pub product_id: String,
    /// Sensor ids in discovery order
    pub sensors: Vec<String>,
    /// Whether a capture session is currently active
    pub is_streaming: bool,
}

/// Information about a sensor within a device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorInfo {
    pub sensor_id: String,
    pub name: String,
    /// Primary stream type produced by the sensor
    #[serde(rename = "type")]
    pub sensor_type: StreamType,
    pub supported_stream_profiles: Vec<StreamProfile>,
    pub options: Vec<OptionInfo>,
}

impl SensorInfo {
    /// Find the profile advertised for a stream type
    pub fn profile(&self, stream_type: StreamType) -> Option<&StreamProfile> {
        self.supported_stream_profiles
            .iter()
            .find(|p| p.stream_type == stream_type)
    }

    pub fn option(&self, option_id: &str) -> Option<&OptionInfo> {
        self.options.iter().find(|o| o.option_id == option_id)
    }

    /// Check if any advertised profile accepts the given config
    pub fn supports(&self, config: &StreamConfig) -> bool {
        self.supported_stream_profiles
            .iter()
            .any(|p| p.supports(config))
    }
}

/// Capability advertised by a sensor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamProfile {
    pub stream_type: StreamType,
    pub resolutions: Vec<Resolution>,
    pub fps: Vec<u32>,
    pub formats: Vec<StreamFormat>,
}

impl StreamProfile {
    pub fn supports(&self, config: &StreamConfig) -> bool {
        self.stream_type == config.stream_type
            && self.resolutions.contains(&config.resolution)
            && self.fps.contains(&config.framerate)
            && self.formats.contains(&config.format)
    }
}

fn default_true() -> bool {
    true
}

/// One requested stream
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamConfig {
    pub sensor_id: String,
    pub stream_type: StreamType,
    pub format: StreamFormat,
    pub resolution: Resolution,
    pub framerate: u32,
    #[serde(default = "default_true")]
    pub enable: bool,
}

/// A set of streams to capture together
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamRequest {
    pub configs: Vec<StreamConfig>,
    /// Stream the others are aligned to
    pub align_to: Option<StreamType>,
    pub apply_filters: bool,
}

impl StreamRequest {
    pub fn new(configs: Vec<StreamConfig>) -> Self {
        Self {
            configs,
            ..Default::default()
        }
    }

    /// Enabled configs in request order
    pub fn enabled(&self) -> impl Iterator<Item = &StreamConfig> {
        self.configs.iter().filter(|c| c.enable)
    }

    pub fn has_enabled(&self) -> bool {
        self.enabled().next().is_some()
    }

    /// Enabled configs as an order-insensitive set
    pub fn enabled_set(&self) -> BTreeSet<&StreamConfig> {
        self.enabled().collect()
    }

    pub fn has_stream(&self, stream_type: StreamType) -> bool {
        self.enabled().any(|c| c.stream_type == stream_type)
    }

    /// Two requests are compatible when they would configure the
    /// pipeline identically.
    pub fn is_compatible(&self, other: &StreamRequest) -> bool {
        self.enabled_set() == other.enabled_set()
            && self.align_to == other.align_to
            && self.apply_filters == other.apply_filters
    }

    /// Copy of this request with disabled configs removed
    pub fn normalized(&self) -> StreamRequest {
        StreamRequest {
            configs: self.enabled().cloned().collect(),
            align_to: self.align_to,
            apply_filters: self.apply_filters,
        }
    }
}

/// Value of a sensor option
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    Boolean(bool),
    Numeric(f64),
    Text(String),
}

impl OptionValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            OptionValue::Numeric(v) => Some(*v),
            OptionValue::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
            OptionValue::Text(_) => None,
        }
    }

    fn variant_name(&self) -> &'static str {
        match self {
            OptionValue::Boolean(_) => "boolean",
            OptionValue::Numeric(_) => "numeric",
            OptionValue::Text(_) => "string",
        }
    }
}

impl std::fmt::Display for OptionValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OptionValue::Boolean(b) => write!(f, "{}", b),
            OptionValue::Numeric(v) => write!(f, "{}", v),
            OptionValue::Text(s) => write!(f, "{:?}", s),
        }
    }
}

/// Shape of the values an option accepts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OptionKind {
    Numeric {
        #[serde(rename = "min_value")]
        min: Option<f64>,
        #[serde(rename = "max_value")]
        max: Option<f64>,
        step: Option<f64>,
    },
    Boolean,
    String,
}

/// A configurable sensor parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionInfo {
    pub option_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub current_value: OptionValue,
    pub default_value: OptionValue,
    #[serde(flatten)]
    pub kind: OptionKind,
    #[serde(default)]
    pub units: Option<String>,
    #[serde(default)]
    pub read_only: bool,
}

impl OptionInfo {
    /// Check a candidate value against this option's constraints.
    ///
    /// Returns the value normalized to the option's own variant.
    pub fn validate(&self, value: &OptionValue) -> Result<OptionValue> {
        if self.read_only {
            return Err(AppError::ReadOnly(self.option_id.clone()));
        }

        match &self.kind {
            OptionKind::Numeric { min, max, step } => {
                let v = value.as_f64().ok_or_else(|| {
                    AppError::BadRequest(format!(
                        "option {} expects a numeric value, got {}",
                        self.option_id,
                        value.variant_name()
                    ))
                })?;

                if !v.is_finite() {
                    return Err(AppError::OutOfRange(format!(
                        "{}: {} is not a finite number",
                        self.option_id, v
                    )));
                }
                if let Some(min) = min {
                    if v < *min {
                        return Err(AppError::OutOfRange(format!(
                            "{}: {} is below minimum {}",
                            self.option_id, v, min
                        )));
                    }
                }
                if let Some(max) = max {
                    if v > *max {
                        return Err(AppError::OutOfRange(format!(
                            "{}: {} is above maximum {}",
                            self.option_id, v, max
                        )));
                    }
                }
                if let Some(step) = step.filter(|s| *s > 0.0) {
                    let base = min.unwrap_or(0.0);
                    let steps = (v - base) / step;
                    if (steps - steps.round()).abs() > STEP_EPSILON {
                        return Err(AppError::OutOfRange(format!(
                            "{}: {} is not a multiple of step {} from {}",
                            self.option_id, v, step, base
                        )));
                    }
                }

                Ok(OptionValue::Numeric(v))
            }
            OptionKind::Boolean => match value {
                OptionValue::Boolean(b) => Ok(OptionValue::Boolean(*b)),
                OptionValue::Numeric(v) if *v == 0.0 => Ok(OptionValue::Boolean(false)),
                OptionValue::Numeric(v) if *v == 1.0 => Ok(OptionValue::Boolean(true)),
                OptionValue::Numeric(v) => Err(AppError::OutOfRange(format!(
                    "{}: boolean option accepts 0 or 1, got {}",
                    self.option_id, v
                ))),
                OptionValue::Text(_) => Err(AppError::BadRequest(format!(
                    "option {} expects a boolean value",
                    self.option_id
                ))),
            },
            OptionKind::String => match value {
                OptionValue::Text(s) => Ok(OptionValue::Text(s.clone())),
                other => Err(AppError::BadRequest(format!(
                    "option {} expects a string value, got {}",
                    self.option_id,
                    other.variant_name()
                ))),
            },
        }
    }
}

/// Streaming status of a device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamStatus {
    pub device_id: String,
    pub is_streaming: bool,
    pub session_id: Option<String>,
    /// Active stream identifiers, e.g. "depth"
    pub active_streams: Vec<String>,
    /// Measured framerate over the last second, all streams combined
    pub framerate: Option<f64>,
    /// Seconds since the session started
    pub duration: Option<f64>,
    pub subscribers: usize,
    pub started_at: Option<DateTime<Utc>>,
}

impl StreamStatus {
    pub fn idle(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            is_streaming: false,
            session_id: None,
            active_streams: Vec::new(),
            framerate: None,
            duration: None,
            subscribers: 0,
            started_at: None,
        }
    }
}

/// Point cloud output status of a device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointCloudStatus {
    pub device_id: String,
    pub is_active: bool,
}
