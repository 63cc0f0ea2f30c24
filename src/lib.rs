//! LiveDesk - voice calls for a live chat widget
//!
//! Signaling core for one-to-one voice calls between a website visitor
//! and a support agent, plus the relay server both sides connect to.
//! Layered the domain-driven way: `domain` rules, `application` use
//! cases, `infrastructure` adapters and the `interface` relay.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod interface;

// Re-export commonly used types
pub use domain::shared::error::{CallError, DomainError};
pub use domain::shared::result::{CallResult, Result};
