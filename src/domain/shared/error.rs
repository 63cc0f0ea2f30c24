//! Domain errors

use thiserror::Error;

/// Relay-side domain errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Room is full: {0}")]
    RoomFull(String),

    #[error("Calls are disabled")]
    CallsDisabled,

    #[error("Not joined to room: {0}")]
    NotJoined(String),
}

impl DomainError {
    /// Short machine-readable code sent back to relay clients
    pub fn code(&self) -> &'static str {
        match self {
            DomainError::ValidationError(_) => "invalid_input",
            DomainError::Unauthorized(_) => "invalid_room_key",
            DomainError::RoomFull(_) => "room_full",
            DomainError::CallsDisabled => "calls_disabled",
            DomainError::NotJoined(_) => "not_joined",
        }
    }
}

/// Platform-reported media device failure.
///
/// `name` carries the platform's failure reason (for browsers the
/// `DOMException` name such as `NotAllowedError`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceError {
    pub name: String,
    pub message: String,
}

impl DeviceError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }
}

/// Call core errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    #[error("ICE server configuration unavailable: {0}")]
    ConfigFetch(String),

    #[error("Microphone permission denied")]
    PermissionDenied,

    #[error("No microphone found")]
    DeviceNotFound,

    #[error("Microphone is busy")]
    DeviceBusy,

    #[error("Microphone capture failed: {0}")]
    Capture(String),

    #[error("Negotiation error: {0}")]
    Negotiation(String),

    #[error("Failed to apply ICE candidate: {0}")]
    CandidateApply(String),

    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    #[error("Signaling error: {0}")]
    Signaling(String),

    #[error("Peer connection error: {0}")]
    PeerConnection(String),
}

impl CallError {
    /// Text shown to the person using the widget
    pub fn user_message(&self) -> String {
        match self {
            CallError::ConfigFetch(_) => {
                "The call could not be started. Please try again later.".to_string()
            }
            CallError::PermissionDenied => {
                "Microphone access was denied. Please allow it in your browser settings."
                    .to_string()
            }
            CallError::DeviceNotFound => {
                "No microphone was found. Please check your device.".to_string()
            }
            CallError::DeviceBusy => {
                "The microphone is being used by another application.".to_string()
            }
            CallError::Capture(msg) => format!("Microphone error: {}", msg),
            CallError::Negotiation(_) | CallError::PeerConnection(_) => {
                "A connection error occurred.".to_string()
            }
            CallError::CandidateApply(_) => "A network path could not be used.".to_string(),
            CallError::InvalidStateTransition(_) => "A call is already in progress.".to_string(),
            CallError::Signaling(_) => "The call service is unreachable.".to_string(),
        }
    }

    /// Whether the error came from acquiring a local resource
    pub fn is_resource_failure(&self) -> bool {
        matches!(
            self,
            CallError::ConfigFetch(_)
                | CallError::PermissionDenied
                | CallError::DeviceNotFound
                | CallError::DeviceBusy
                | CallError::Capture(_)
        )
    }
}

impl From<DeviceError> for CallError {
    fn from(err: DeviceError) -> Self {
        match err.name.as_str() {
            "NotAllowedError" | "PermissionDeniedError" | "SecurityError" => {
                CallError::PermissionDenied
            }
            "NotFoundError" | "DevicesNotFoundError" | "OverconstrainedError" => {
                CallError::DeviceNotFound
            }
            "NotReadableError" | "TrackStartError" | "AbortError" => CallError::DeviceBusy,
            _ => CallError::Capture(err.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_error_mapping() {
        assert_eq!(
            CallError::from(DeviceError::new("NotAllowedError", "denied")),
            CallError::PermissionDenied
        );
        assert_eq!(
            CallError::from(DeviceError::new("NotFoundError", "none")),
            CallError::DeviceNotFound
        );
        assert_eq!(
            CallError::from(DeviceError::new("NotReadableError", "busy")),
            CallError::DeviceBusy
        );
        assert_eq!(
            CallError::from(DeviceError::new("TypeError", "bad constraints")),
            CallError::Capture("bad constraints".to_string())
        );
    }

    #[test]
    fn test_distinct_user_messages() {
        let denied = CallError::PermissionDenied.user_message();
        let missing = CallError::DeviceNotFound.user_message();
        let busy = CallError::DeviceBusy.user_message();

        assert_ne!(denied, missing);
        assert_ne!(missing, busy);
        assert_ne!(denied, busy);
    }

    #[test]
    fn test_resource_failures() {
        assert!(CallError::ConfigFetch("down".into()).is_resource_failure());
        assert!(CallError::DeviceBusy.is_resource_failure());
        assert!(!CallError::Negotiation("late".into()).is_resource_failure());
    }
}
