//! Shared kernel - Common types used by the call core and the relay

pub mod error;
pub mod result;
pub mod value_objects;

pub use error::{CallError, DeviceError, DomainError};
pub use result::{CallResult, Result};
pub use value_objects::*;
