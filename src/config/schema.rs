use serde::{Deserialize, Serialize};

use crate::device::BackendType;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Web server settings
    pub web: WebConfig,
    /// ICE server settings
    pub webrtc: WebRtcSettings,
    /// Peer and capture session settings
    pub session: SessionSettings,
    /// Camera backend settings
    pub hardware: HardwareConfig,
}

/// Web server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    /// Bind address
    pub bind_address: String,
    /// HTTP port
    pub http_port: u16,
    /// Allowed CORS origins; "*" allows any
    pub cors_origins: Vec<String>,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            http_port: 8000,
            cors_origins: vec!["*".to_string()],
        }
    }
}

/// ICE server configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WebRtcSettings {
    /// STUN server (e.g., "stun:stun.l.google.com:19302")
    pub stun_server: Option<String>,
    /// TURN server (e.g., "turn:turn.example.com:3478")
    pub turn_server: Option<String>,
    /// TURN username
    pub turn_username: Option<String>,
    /// TURN password
    pub turn_password: Option<String>,
}

/// Session lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Deadline from offer to connected transport (milliseconds)
    pub handshake_timeout_ms: u64,
    /// Interval of the cleanup loop (seconds)
    pub cleanup_interval_secs: u64,
    /// Viewers silent for longer than this are evicted (seconds)
    pub stale_timeout_secs: u64,
    /// Frames buffered per viewer before the oldest are dropped
    pub frame_queue_depth: usize,
    /// Maximum concurrent peer sessions
    pub max_peer_sessions: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            handshake_timeout_ms: 10_000,
            cleanup_interval_secs: 5,
            stale_timeout_secs: 30,
            frame_queue_depth: 4,
            max_peer_sessions: 16,
        }
    }
}

/// Camera backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HardwareConfig {
    pub backend: BackendType,
    /// Number of devices the synthetic backend simulates
    pub synthetic_devices: usize,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            backend: BackendType::V4l2,
            synthetic_devices: 1,
        }
    }
}

impl AppConfig {
    /// Reject settings the server cannot run with
    pub fn validate(&self) -> crate::error::Result<()> {
        use crate::error::AppError;

        if self.session.frame_queue_depth == 0 {
            return Err(AppError::Config(
                "session.frame_queue_depth must be at least 1".to_string(),
            ));
        }
        if self.session.cleanup_interval_secs == 0 {
            return Err(AppError::Config(
                "session.cleanup_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.session.handshake_timeout_ms == 0 {
            return Err(AppError::Config(
                "session.handshake_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
