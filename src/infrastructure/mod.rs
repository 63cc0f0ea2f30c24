//! Infrastructure layer - Technical implementations
//!
//! This layer contains:
//! - WebRTC peer connections and local audio (webrtc-rs)
//! - ICE configuration sources
//! - The websocket signaling transport
//! - Client wiring for embedding applications

pub mod client;
pub mod ice_config;
pub mod transport;
pub mod webrtc;

pub use client::CallClient;
pub use ice_config::{HttpIceConfigSource, StaticIceConfigSource};
