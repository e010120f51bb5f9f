//! WebRTC configuration

use serde::{Deserialize, Serialize};

use crate::config::WebRtcSettings;

/// WebRTC transport configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebRtcConfig {
    /// STUN server URLs
    pub stun_servers: Vec<String>,
    /// TURN server configuration
    pub turn_servers: Vec<TurnServer>,
}

impl WebRtcConfig {
    /// Build from the persisted settings; empty fields are skipped
    pub fn from_settings(settings: &WebRtcSettings) -> Self {
        let stun_servers = settings
            .stun_server
            .iter()
            .filter(|s| !s.trim().is_empty())
            .cloned()
            .collect();

        let turn_servers = settings
            .turn_server
            .iter()
            .filter(|s| !s.trim().is_empty())
            .map(|url| {
                TurnServer::new(
                    url.clone(),
                    settings.turn_username.clone().unwrap_or_default(),
                    settings.turn_password.clone().unwrap_or_default(),
                )
            })
            .collect();

        Self {
            stun_servers,
            turn_servers,
        }
    }

    /// ICE servers as handed to browsers
    pub fn ice_servers(&self) -> Vec<IceServerInfo> {
        let mut servers: Vec<IceServerInfo> = self
            .stun_servers
            .iter()
            .map(|url| IceServerInfo {
                urls: vec![url.clone()],
                username: None,
                credential: None,
            })
            .collect();
        servers.extend(self.turn_servers.iter().map(|turn| IceServerInfo {
            urls: turn.urls.clone(),
            username: Some(turn.username.clone()),
            credential: Some(turn.credential.clone()),
        }));
        servers
    }
}

/// TURN server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnServer {
    /// TURN URLs, e.g. "turn:turn.example.com:3478?transport=udp"
    pub urls: Vec<String>,
    pub username: String,
    pub credential: String,
}

impl TurnServer {
    pub fn new(url: String, username: String, credential: String) -> Self {
        Self {
            urls: vec![url],
            username,
            credential,
        }
    }
}

/// Browser-side `RTCIceServer` entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IceServerInfo {
    pub urls: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}
