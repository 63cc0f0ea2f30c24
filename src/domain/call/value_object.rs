//! Call value objects

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which side of the call this endpoint plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallRole {
    /// Placed the call and sends the offer
    Caller,
    /// Received the ring and sends the answer
    Callee,
}

/// Call state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallState {
    /// No call attempt yet
    Idle,
    /// Waiting for the callee to accept (caller) or for the local decision (callee)
    Ringing(CallRole),
    /// Accepted, exchanging descriptions
    Negotiating,
    /// Offer and answer applied on this side
    Connected,
    /// Call has ended
    Ended(EndReason),
}

impl CallState {
    /// Check if state transition is valid
    pub fn can_transition_to(&self, new_state: &CallState) -> bool {
        use CallState::*;

        match (self, new_state) {
            (Idle, Ringing(_)) => true,
            (Idle, Ended(_)) => true,

            (Ringing(_), Negotiating) => true,
            (Ringing(_), Ended(_)) => true,

            (Negotiating, Connected) => true,
            (Negotiating, Ended(_)) => true,

            (Connected, Ended(_)) => true,

            (Ended(_), _) => false,

            _ => false,
        }
    }

    /// Ringing, negotiating or connected
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            CallState::Ringing(_) | CallState::Negotiating | CallState::Connected
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CallState::Ended(_))
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallState::Idle => write!(f, "idle"),
            CallState::Ringing(CallRole::Caller) => write!(f, "ringing(caller)"),
            CallState::Ringing(CallRole::Callee) => write!(f, "ringing(callee)"),
            CallState::Negotiating => write!(f, "negotiating"),
            CallState::Connected => write!(f, "connected"),
            CallState::Ended(reason) => write!(f, "ended({:?})", reason),
        }
    }
}

/// Reason for call ending
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndReason {
    /// Local side hung up
    LocalHangup,
    /// Remote side sent `ended`
    RemoteHangup,
    /// Remote side declined
    Declined,
    /// Local side declined the incoming ring
    Rejected,
    /// Ring timed out
    NoAnswer,
    /// Unrecoverable error
    Failed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_state_transitions() {
        let idle = CallState::Idle;
        assert!(idle.can_transition_to(&CallState::Ringing(CallRole::Caller)));
        assert!(idle.can_transition_to(&CallState::Ended(EndReason::Failed("x".into()))));
        assert!(!idle.can_transition_to(&CallState::Connected));

        let ringing = CallState::Ringing(CallRole::Callee);
        assert!(ringing.can_transition_to(&CallState::Negotiating));
        assert!(ringing.can_transition_to(&CallState::Ended(EndReason::Rejected)));
        assert!(!ringing.can_transition_to(&CallState::Connected));

        assert!(CallState::Negotiating.can_transition_to(&CallState::Connected));
        assert!(CallState::Connected.can_transition_to(&CallState::Ended(EndReason::LocalHangup)));
    }

    #[test]
    fn test_invalid_state_transitions() {
        let ended = CallState::Ended(EndReason::RemoteHangup);
        assert!(!ended.can_transition_to(&CallState::Connected));
        assert!(!ended.can_transition_to(&CallState::Ended(EndReason::LocalHangup)));
        assert!(!CallState::Connected.can_transition_to(&CallState::Negotiating));
    }

    #[test]
    fn test_activity() {
        assert!(!CallState::Idle.is_active());
        assert!(CallState::Ringing(CallRole::Caller).is_active());
        assert!(CallState::Connected.is_active());
        assert!(CallState::Ended(EndReason::NoAnswer).is_terminal());
    }
}
