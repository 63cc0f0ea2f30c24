//! Signaling bounded context - conversation-scoped call events

pub mod message;
pub mod room;

pub use message::{CallControl, CallFrame, SignalKind, SignalingMessage};
pub use room::{RoomKeys, RoomRegistry};
