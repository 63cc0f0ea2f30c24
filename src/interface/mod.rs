//! Interface layer - External interfaces
//!
//! This layer handles:
//! - Call signaling and chat websocket relays
//! - REST endpoints (ICE configuration, health, metrics)

pub mod api;
