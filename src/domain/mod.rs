//! Domain layer - Core rules of the call widget
//!
//! This layer contains:
//! - Value objects: conversation and session identifiers
//! - Call state, roles and media negotiation types
//! - Signaling wire messages and relay room state
//! - Chat messages that share a conversation with calls

pub mod call;
pub mod chat;
pub mod ice;
pub mod shared;
pub mod signaling;

// Re-export commonly used types
pub use shared::{CallError, CallResult, DomainError, Result};
