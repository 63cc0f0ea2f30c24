//! Domain result types

use super::error::{CallError, DomainError};

/// Standard result type for relay-side domain operations
pub type Result<T> = std::result::Result<T, DomainError>;

/// Result type for the call core
pub type CallResult<T> = std::result::Result<T, CallError>;
