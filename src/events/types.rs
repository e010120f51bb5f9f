//! System event types
//!
//! Defines all event types that can be broadcast through the event bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::device::{DeviceInfo, OptionValue};

/// Per-subscriber delivery counters carried in stats events
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriberStats {
    pub viewer_id: String,
    pub delivered: u64,
    pub dropped: u64,
    pub failed: u64,
}

/// System event enumeration
///
/// Serialized as `{ "event": "<name>", "data": { ... } }`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum SystemEvent {
    // ============================================================================
    // Device Events
    // ============================================================================
    /// A device appeared during discovery or hotplug
    #[serde(rename = "device.discovered")]
    DeviceDiscovered { device: DeviceInfo },

    /// A device was disconnected
    #[serde(rename = "device.lost")]
    DeviceLost { device_id: String, reason: String },

    /// An option value was written
    #[serde(rename = "device.option_changed")]
    OptionChanged {
        device_id: String,
        sensor_id: String,
        option_id: String,
        value: OptionValue,
    },

    // ============================================================================
    // Capture Events
    // ============================================================================
    /// A capture session became active
    #[serde(rename = "stream.started")]
    StreamStarted {
        device_id: String,
        session_id: String,
        /// Active stream identifiers, e.g. "depth"
        streams: Vec<String>,
    },

    /// A capture session was torn down
    #[serde(rename = "stream.stopped")]
    StreamStopped {
        device_id: String,
        session_id: String,
        reason: String,
    },

    /// Periodic framerate report for an active session
    #[serde(rename = "stream.stats")]
    StreamStats {
        device_id: String,
        session_id: String,
        /// Frames per second over the last interval, all streams combined
        fps: f64,
        subscribers: Vec<SubscriberStats>,
    },

    /// Point cloud output toggled
    #[serde(rename = "stream.point_cloud_changed")]
    PointCloudChanged { device_id: String, is_active: bool },

    // ============================================================================
    // Peer Events
    // ============================================================================
    /// Peer session state changed
    #[serde(rename = "peer.state_changed")]
    PeerStateChanged {
        viewer_id: String,
        device_id: String,
        /// "negotiating", "connected", "closed", "failed"
        state: String,
        timestamp: DateTime<Utc>,
    },

    // ============================================================================
    // System Events
    // ============================================================================
    /// Isolated failure surfaced for observability
    #[serde(rename = "system.error")]
    SystemError {
        /// Module name: "capture", "peer", "cleanup", "device"
        module: String,
        /// Severity: "warning", "error"
        severity: String,
        message: String,
    },
}

impl SystemEvent {
    /// Get the event name (for filtering/routing)
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::DeviceDiscovered { .. } => "device.discovered",
            Self::DeviceLost { .. } => "device.lost",
            Self::OptionChanged { .. } => "device.option_changed",
            Self::StreamStarted { .. } => "stream.started",
            Self::StreamStopped { .. } => "stream.stopped",
            Self::StreamStats { .. } => "stream.stats",
            Self::PointCloudChanged { .. } => "stream.point_cloud_changed",
            Self::PeerStateChanged { .. } => "peer.state_changed",
            Self::SystemError { .. } => "system.error",
        }
    }

    /// Check if event matches a topic pattern
    ///
    /// Supports `*` for everything and `prefix.*` wildcards.
    pub fn matches_topic(&self, topic: &str) -> bool {
        if topic == "*" {
            return true;
        }

        let event_name = self.event_name();
        match topic.strip_suffix(".*") {
            Some(prefix) => event_name
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.starts_with('.')),
            None => event_name == topic,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_name() {
        let event = SystemEvent::StreamStopped {
            device_id: "D1".to_string(),
            session_id: "s".to_string(),
            reason: "stopped".to_string(),
        };
        assert_eq!(event.event_name(), "stream.stopped");
    }

    #[test]
    fn test_matches_topic() {
        let event = SystemEvent::PointCloudChanged {
            device_id: "D1".to_string(),
            is_active: true,
        };

        assert!(event.matches_topic("*"));
        assert!(event.matches_topic("stream.*"));
        assert!(event.matches_topic("stream.point_cloud_changed"));
        assert!(!event.matches_topic("device.*"));
        assert!(!event.matches_topic("str.*"));
    }

    #[test]
    fn test_serialization() {
        let event = SystemEvent::DeviceLost {
            device_id: "D1".to_string(),
            reason: "unplugged".to_string(),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "device.lost");
        assert_eq!(json["data"]["device_id"], "D1");
    }
}
