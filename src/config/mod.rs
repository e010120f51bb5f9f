//! Process configuration

mod schema;
mod store;

pub use schema::{AppConfig, HardwareConfig, SessionSettings, WebConfig, WebRtcSettings};
pub use store::{ConfigChange, ConfigStore};
