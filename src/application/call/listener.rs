use crate::domain::call::CallState;
use crate::domain::shared::error::CallError;
use crate::domain::shared::value_objects::ConversationId;

/// Observer of call state machine transitions
pub trait CallListener: Send + Sync {
    fn on_state_changed(&self, conversation_id: &ConversationId, state: &CallState);
    /// Remote side is ringing us; the user must accept or decline
    fn on_incoming_call(&self, conversation_id: &ConversationId, from: &str);
    /// The call attempt was aborted by a local failure
    fn on_call_failed(&self, conversation_id: &ConversationId, error: &CallError);
}

pub struct StubListener;

impl CallListener for StubListener {
    fn on_state_changed(&self, _conversation_id: &ConversationId, _state: &CallState) {}
    fn on_incoming_call(&self, _conversation_id: &ConversationId, _from: &str) {}
    fn on_call_failed(&self, _conversation_id: &ConversationId, _error: &CallError) {}
}
