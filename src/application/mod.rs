//! Application layer - Use cases and application services
//!
//! This layer orchestrates domain objects to fulfill use cases.
//! It's responsible for:
//! - Routing signaling events to the session that owns them
//! - Driving media negotiation for a call session
//! - Publishing call state to the widget UI

pub mod call;
