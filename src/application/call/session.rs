//! Call session - one per call attempt, never reused

use super::media::PeerConnection;
use crate::domain::call::{
    CallRole, CallState, IceCandidate, LocalStream, RemoteStream, SdpType, SessionDescription,
};
use crate::domain::shared::error::CallError;
use crate::domain::shared::result::CallResult;
use crate::domain::shared::value_objects::{ConversationId, SessionId};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::debug;

/// Ephemeral state of one call attempt.
///
/// Exclusively owns its peer connection and local stream; the remote
/// stream is only observed.
pub struct CallSession {
    id: SessionId,
    conversation_id: ConversationId,
    role: CallRole,
    state: CallState,
    remote_name: Option<String>,
    pub(super) peer: Option<Box<dyn PeerConnection>>,
    pub(super) local_stream: Option<LocalStream>,
    pub(super) remote_stream: Arc<Mutex<Option<RemoteStream>>>,
    pub(super) local_description: Option<SessionDescription>,
    pub(super) remote_description: Option<SessionDescription>,
    pub(super) pending_candidates: VecDeque<IceCandidate>,
    pub(super) event_task: Option<JoinHandle<()>>,
    pub(super) closed: bool,
}

impl CallSession {
    /// Create a session without allocating any connection resources
    pub fn new(conversation_id: ConversationId, role: CallRole) -> Self {
        Self {
            id: SessionId::new(),
            conversation_id,
            role,
            state: CallState::Idle,
            remote_name: None,
            peer: None,
            local_stream: None,
            remote_stream: Arc::new(Mutex::new(None)),
            local_description: None,
            remote_description: None,
            pending_candidates: VecDeque::new(),
            event_task: None,
            closed: false,
        }
    }

    pub fn with_remote_name(mut self, name: impl Into<String>) -> Self {
        self.remote_name = Some(name.into());
        self
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn conversation_id(&self) -> &ConversationId {
        &self.conversation_id
    }

    pub fn role(&self) -> CallRole {
        self.role
    }

    pub fn state(&self) -> &CallState {
        &self.state
    }

    pub fn remote_name(&self) -> Option<&str> {
        self.remote_name.as_deref()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn has_peer(&self) -> bool {
        self.peer.is_some()
    }

    pub fn has_local_stream(&self) -> bool {
        self.local_stream.is_some()
    }

    pub fn local_description(&self) -> Option<&SessionDescription> {
        self.local_description.as_ref()
    }

    pub fn remote_description(&self) -> Option<&SessionDescription> {
        self.remote_description.as_ref()
    }

    pub fn remote_stream(&self) -> Option<RemoteStream> {
        self.remote_stream
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn pending_candidate_count(&self) -> usize {
        self.pending_candidates.len()
    }

    /// Move to a new state, enforcing the call lifecycle
    pub fn transition_to(&mut self, new_state: CallState) -> CallResult<()> {
        if !self.state.can_transition_to(&new_state) {
            return Err(CallError::InvalidStateTransition(format!(
                "Cannot transition from {} to {}",
                self.state, new_state
            )));
        }

        debug!(
            "session.transition id={} {} -> {}",
            self.id, self.state, new_state
        );
        self.state = new_state;
        Ok(())
    }

    /// Whether a remote description of this type is expected now.
    ///
    /// The callee expects exactly one offer before producing anything
    /// itself; the caller expects exactly one answer after its offer.
    pub fn expects_remote_description(&self, sdp_type: SdpType) -> bool {
        if self.closed || self.remote_description.is_some() {
            return false;
        }
        match (self.role, sdp_type) {
            (CallRole::Callee, SdpType::Offer) => self.local_description.is_none(),
            (CallRole::Caller, SdpType::Answer) => matches!(
                self.local_description,
                Some(SessionDescription {
                    sdp_type: SdpType::Offer,
                    ..
                })
            ),
            _ => false,
        }
    }

    pub(super) fn peer(&self) -> CallResult<&dyn PeerConnection> {
        self.peer
            .as_deref()
            .ok_or_else(|| CallError::PeerConnection("No peer connection for session".to_string()))
    }
}

impl Drop for CallSession {
    fn drop(&mut self) {
        if let Some(task) = self.event_task.take() {
            task.abort();
        }
        if let Some(stream) = self.local_stream.take() {
            stream.stop_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::call::EndReason;

    #[test]
    fn test_new_session_is_idle() {
        let session = CallSession::new("c1".into(), CallRole::Caller);
        assert_eq!(session.state(), &CallState::Idle);
        assert!(!session.has_peer());
        assert!(!session.is_closed());
    }

    #[test]
    fn test_transition_rules_are_enforced() {
        let mut session = CallSession::new("c1".into(), CallRole::Callee);
        session
            .transition_to(CallState::Ringing(CallRole::Callee))
            .unwrap();

        let result = session.transition_to(CallState::Connected);
        assert!(matches!(result, Err(CallError::InvalidStateTransition(_))));

        session
            .transition_to(CallState::Ended(EndReason::Rejected))
            .unwrap();
        assert!(session.state().is_terminal());
    }

    #[test]
    fn test_remote_description_expectations() {
        let mut callee = CallSession::new("c1".into(), CallRole::Callee);
        assert!(callee.expects_remote_description(SdpType::Offer));
        assert!(!callee.expects_remote_description(SdpType::Answer));

        callee.remote_description = Some(SessionDescription::offer("v=0"));
        assert!(!callee.expects_remote_description(SdpType::Offer));

        let mut caller = CallSession::new("c1".into(), CallRole::Caller);
        assert!(!caller.expects_remote_description(SdpType::Answer));

        caller.local_description = Some(SessionDescription::offer("v=0"));
        assert!(caller.expects_remote_description(SdpType::Answer));
        assert!(!caller.expects_remote_description(SdpType::Offer));
    }
}
