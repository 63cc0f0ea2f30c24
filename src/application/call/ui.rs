//! Call UI Controller
//!
//! Maps state machine transitions to what the widget shows and turns
//! button presses into [`CallHandle`] commands. The view is published
//! on a `watch` channel so any number of renderers can follow it.

use super::listener::CallListener;
use super::state_machine::CallHandle;
use crate::domain::call::{CallRole, CallState};
use crate::domain::shared::error::CallError;
use crate::domain::shared::result::CallResult;
use crate::domain::shared::value_objects::ConversationId;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screen {
    Chat,
    Call,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingPrompt {
    pub from: String,
}

/// Snapshot of the call UI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallView {
    pub screen: Screen,
    /// Accept/decline prompt shown over the chat
    pub prompt: Option<IncomingPrompt>,
    pub state: CallState,
    /// Last user-facing failure
    pub notice: Option<String>,
    pub speaker_on: bool,
}

impl Default for CallView {
    fn default() -> Self {
        Self {
            screen: Screen::Chat,
            prompt: None,
            state: CallState::Idle,
            notice: None,
            speaker_on: false,
        }
    }
}

pub struct CallUiController {
    handle: CallHandle,
    view: watch::Sender<CallView>,
    speaker_on: AtomicBool,
}

impl CallUiController {
    pub fn new(handle: CallHandle) -> Self {
        let (view, _) = watch::channel(CallView::default());
        Self {
            handle,
            view,
            speaker_on: AtomicBool::new(false),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<CallView> {
        self.view.subscribe()
    }

    pub fn view(&self) -> CallView {
        self.view.borrow().clone()
    }

    pub fn place_call(&self) -> CallResult<()> {
        self.view.send_modify(|view| view.notice = None);
        self.handle.place_call()
    }

    pub fn accept(&self) -> CallResult<()> {
        self.handle.accept()
    }

    pub fn decline(&self) -> CallResult<()> {
        self.handle.decline()
    }

    pub fn hang_up(&self) -> CallResult<()> {
        self.handle.hangup()
    }

    /// Flip between loudspeaker and default output; returns the new setting
    pub fn toggle_speaker(&self) -> CallResult<bool> {
        let on = !self.speaker_on.fetch_xor(true, Ordering::SeqCst);
        self.view.send_modify(|view| view.speaker_on = on);
        self.handle.set_speaker(on)?;
        Ok(on)
    }
}

impl CallListener for CallUiController {
    fn on_state_changed(&self, conversation_id: &ConversationId, state: &CallState) {
        debug!("ui.state room={} state={}", conversation_id, state);
        let state = state.clone();
        self.view.send_modify(|view| {
            match &state {
                CallState::Ringing(CallRole::Callee) => {
                    view.screen = Screen::Chat;
                }
                CallState::Ringing(CallRole::Caller)
                | CallState::Negotiating
                | CallState::Connected => {
                    view.screen = Screen::Call;
                    view.prompt = None;
                }
                CallState::Idle | CallState::Ended(_) => {
                    view.screen = Screen::Chat;
                    view.prompt = None;
                }
            }
            view.state = state;
        });
    }

    fn on_incoming_call(&self, _conversation_id: &ConversationId, from: &str) {
        let from = from.to_string();
        self.view.send_modify(|view| {
            view.screen = Screen::Chat;
            view.prompt = Some(IncomingPrompt { from });
            view.notice = None;
        });
    }

    fn on_call_failed(&self, _conversation_id: &ConversationId, error: &CallError) {
        let notice = error.user_message();
        self.view.send_modify(|view| {
            view.screen = Screen::Chat;
            view.prompt = None;
            view.notice = Some(notice);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::call::EndReason;

    fn controller() -> CallUiController {
        let (handle, _mailbox) = CallHandle::pair();
        CallUiController::new(handle)
    }

    #[test]
    fn test_incoming_call_shows_prompt_over_chat() {
        let ui = controller();
        let room = ConversationId::new("c1");

        ui.on_state_changed(&room, &CallState::Ringing(CallRole::Callee));
        ui.on_incoming_call(&room, "Agent Smith");

        let view = ui.view();
        assert_eq!(view.screen, Screen::Chat);
        assert_eq!(view.prompt.unwrap().from, "Agent Smith");
    }

    #[test]
    fn test_active_call_switches_to_call_screen() {
        let ui = controller();
        let room = ConversationId::new("c1");

        ui.on_incoming_call(&room, "Agent Smith");
        ui.on_state_changed(&room, &CallState::Negotiating);

        let view = ui.view();
        assert_eq!(view.screen, Screen::Call);
        assert!(view.prompt.is_none());
    }

    #[test]
    fn test_failure_returns_to_chat_with_notice() {
        let ui = controller();
        let room = ConversationId::new("c1");

        ui.on_state_changed(&room, &CallState::Negotiating);
        ui.on_call_failed(&room, &CallError::PermissionDenied);
        ui.on_state_changed(&room, &CallState::Ended(EndReason::Failed("denied".into())));

        let view = ui.view();
        assert_eq!(view.screen, Screen::Chat);
        assert_eq!(view.notice, Some(CallError::PermissionDenied.user_message()));
    }

    #[test]
    fn test_subscribers_see_screen_changes() {
        let ui = controller();
        let mut rx = ui.subscribe();

        ui.on_state_changed(&ConversationId::new("c1"), &CallState::Connected);

        tokio_test::block_on(rx.changed()).unwrap();
        assert_eq!(rx.borrow().screen, Screen::Call);
    }

    #[test]
    fn test_toggle_speaker_flips_setting() {
        let (handle, _mailbox) = CallHandle::pair();
        let ui = CallUiController::new(handle);

        assert!(ui.toggle_speaker().unwrap());
        assert!(!ui.toggle_speaker().unwrap());
        assert!(!ui.view().speaker_on);
    }
}
