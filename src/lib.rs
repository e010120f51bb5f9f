//! realsense-monitor - depth camera control and streaming server
//!
//! Discovers RealSense-class cameras, exposes their sensors and options,
//! runs one exclusive capture session per device and fans its frames out
//! to WebRTC viewers.

pub mod capture;
pub mod config;
pub mod device;
pub mod error;
pub mod events;
pub mod state;
pub mod utils;
pub mod web;
pub mod webrtc;

pub use error::{AppError, Result};
