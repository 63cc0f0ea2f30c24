//! Call Negotiation State Machine
//!
//! Drives ring → accept/decline → offer → answer → connected/ended for
//! both roles. Runs as a single task: inbound signaling is queued by
//! session-scoped channel handlers and processed one event at a time.

use super::channel::{HandlerGuard, SignalingChannel};
use super::listener::CallListener;
use super::media::MediaSessionManager;
use super::session::CallSession;
use crate::config::Config;
use crate::domain::call::{CallRole, CallState, EndReason, IceCandidate, SessionDescription};
use crate::domain::shared::error::CallError;
use crate::domain::shared::result::CallResult;
use crate::domain::shared::value_objects::{ConversationId, SessionId};
use crate::domain::signaling::{SignalKind, SignalingMessage};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Local user actions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallCommand {
    PlaceCall,
    Accept,
    Decline,
    Hangup,
    SetSpeaker(bool),
    /// Hang up whatever is open and stop the event loop
    Shutdown,
}

/// Cancellation shared between a session, its channel handlers and the handle
#[derive(Clone, Default)]
struct CancelFlag(Arc<Mutex<Option<EndReason>>>);

impl CancelFlag {
    /// First reason wins
    fn cancel(&self, reason: EndReason) {
        let mut slot = self.0.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_none() {
            *slot = Some(reason);
        }
    }

    fn reason(&self) -> Option<EndReason> {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

type CancelSlot = Arc<Mutex<Option<CancelFlag>>>;

/// Cloneable command surface of a running state machine
#[derive(Clone)]
pub struct CallHandle {
    commands: mpsc::UnboundedSender<CallCommand>,
    cancel: CancelSlot,
}

/// Receiving side of a [`CallHandle`], consumed by the state machine
pub struct CallMailbox {
    commands: mpsc::UnboundedReceiver<CallCommand>,
    cancel: CancelSlot,
}

impl CallHandle {
    pub fn pair() -> (Self, CallMailbox) {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel: CancelSlot = Arc::new(Mutex::new(None));
        (
            Self {
                commands: tx,
                cancel: cancel.clone(),
            },
            CallMailbox {
                commands: rx,
                cancel,
            },
        )
    }

    fn submit(&self, command: CallCommand) -> CallResult<()> {
        self.commands
            .send(command)
            .map_err(|_| CallError::Signaling("Call engine is not running".to_string()))
    }

    pub fn place_call(&self) -> CallResult<()> {
        self.submit(CallCommand::PlaceCall)
    }

    pub fn accept(&self) -> CallResult<()> {
        self.submit(CallCommand::Accept)
    }

    pub fn decline(&self) -> CallResult<()> {
        self.submit(CallCommand::Decline)
    }

    /// Hang up. Any capture still in flight is released as soon as it resolves.
    pub fn hangup(&self) -> CallResult<()> {
        if let Some(flag) = self
            .cancel
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
        {
            flag.cancel(EndReason::LocalHangup);
        }
        self.submit(CallCommand::Hangup)
    }

    pub fn set_speaker(&self, on: bool) -> CallResult<()> {
        self.submit(CallCommand::SetSpeaker(on))
    }

    pub fn shutdown(&self) -> CallResult<()> {
        self.submit(CallCommand::Shutdown)
    }
}

#[derive(Debug, Clone)]
pub struct CallSettings {
    /// Name announced in `call:ring`
    pub display_name: String,
    pub ring_timeout: Option<Duration>,
    pub negotiation_timeout: Option<Duration>,
}

impl CallSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            display_name: config.client.display_name.clone(),
            ring_timeout: config.calls.ring_timeout(),
            negotiation_timeout: config.calls.negotiation_timeout(),
        }
    }
}

impl Default for CallSettings {
    fn default() -> Self {
        Self {
            display_name: "Customer".to_string(),
            ring_timeout: Some(Duration::from_secs(45)),
            negotiation_timeout: Some(Duration::from_secs(30)),
        }
    }
}

/// Inbound work queued by channel handlers
#[derive(Debug)]
enum Inbound {
    Ring(String),
    Session(SessionId, SignalingMessage),
}

struct ActiveCall {
    session: CallSession,
    cancel: CancelFlag,
    deadline: Option<Instant>,
    _handlers: HandlerGuard,
}

pub struct CallStateMachine {
    conversation_id: ConversationId,
    settings: CallSettings,
    channel: Arc<SignalingChannel>,
    media: MediaSessionManager,
    listener: Arc<dyn CallListener>,
    active: Option<ActiveCall>,
    last_ended: Option<EndReason>,
    inbox_tx: mpsc::UnboundedSender<Inbound>,
    inbox_rx: Option<mpsc::UnboundedReceiver<Inbound>>,
    commands: Option<mpsc::UnboundedReceiver<CallCommand>>,
    cancel_slot: CancelSlot,
    _ring_handler: HandlerGuard,
}

fn deadline_after(timeout: Option<Duration>) -> Option<Instant> {
    timeout.map(|t| Instant::now() + t)
}

impl CallStateMachine {
    pub fn new(
        settings: CallSettings,
        channel: Arc<SignalingChannel>,
        media: MediaSessionManager,
        listener: Arc<dyn CallListener>,
        mailbox: CallMailbox,
    ) -> Self {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();

        // Rings are conversation-scoped; everything else is registered per session
        let mut ring_handler = HandlerGuard::new(channel.clone());
        let tx = inbox_tx.clone();
        ring_handler.on(SignalKind::Ring, move |message| {
            if let SignalingMessage::Ring { from, .. } = message {
                let _ = tx.send(Inbound::Ring(from.clone()));
            }
        });

        Self {
            conversation_id: channel.conversation_id().clone(),
            settings,
            channel,
            media,
            listener,
            active: None,
            last_ended: None,
            inbox_tx,
            inbox_rx: Some(inbox_rx),
            commands: Some(mailbox.commands),
            cancel_slot: mailbox.cancel,
            _ring_handler: ring_handler,
        }
    }

    pub fn conversation_id(&self) -> &ConversationId {
        &self.conversation_id
    }

    /// Current state of the open session, else the outcome of the last one
    pub fn state(&self) -> CallState {
        match (&self.active, &self.last_ended) {
            (Some(active), _) => active.session.state().clone(),
            (None, Some(reason)) => CallState::Ended(reason.clone()),
            (None, None) => CallState::Idle,
        }
    }

    pub fn session(&self) -> Option<&CallSession> {
        self.active.as_ref().map(|a| &a.session)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.active.as_ref().and_then(|a| a.deadline)
    }

    fn notify(&self, state: &CallState) {
        info!("call.state room={} state={}", self.conversation_id, state);
        self.listener.on_state_changed(&self.conversation_id, state);
    }

    fn cancelled(&self) -> Option<EndReason> {
        self.active.as_ref().and_then(|a| a.cancel.reason())
    }

    fn active_state(&self) -> Option<(CallState, CallRole)> {
        self.active
            .as_ref()
            .map(|a| (a.session.state().clone(), a.session.role()))
    }

    fn message(&self, kind: SignalKind) -> SignalingMessage {
        let conversation_id = self.conversation_id.clone();
        match kind {
            SignalKind::Accept => SignalingMessage::Accept { conversation_id },
            SignalKind::Decline => SignalingMessage::Decline { conversation_id },
            _ => SignalingMessage::Ended { conversation_id },
        }
    }

    /// Install a session with handlers scoped to its lifetime
    fn open(&mut self, session: CallSession, deadline: Option<Instant>) {
        let session_id = session.id();
        let cancel = CancelFlag::default();
        let mut handlers = HandlerGuard::new(self.channel.clone());

        for kind in SignalKind::SESSION_SCOPED {
            let tx = self.inbox_tx.clone();
            let flag = cancel.clone();
            handlers.on(kind, move |message| {
                // Declines are acted on only while ringing, when nothing is captured
                if kind == SignalKind::Ended {
                    flag.cancel(EndReason::RemoteHangup);
                }
                let _ = tx.send(Inbound::Session(session_id, message.clone()));
            });
        }

        *self.cancel_slot.lock().unwrap_or_else(|e| e.into_inner()) = Some(cancel.clone());
        self.last_ended = None;
        self.active = Some(ActiveCall {
            session,
            cancel,
            deadline,
            _handlers: handlers,
        });
    }

    fn transition(&mut self, state: CallState, deadline: Option<Instant>) -> CallResult<()> {
        if let Some(active) = self.active.as_mut() {
            active.session.transition_to(state.clone())?;
            active.deadline = deadline;
        }
        self.notify(&state);
        Ok(())
    }

    /// Close the open session and release everything it holds
    async fn finish(&mut self, reason: EndReason) {
        let Some(mut active) = self.active.take() else {
            return;
        };

        self.media.close(&mut active.session).await;
        if let Err(e) = active
            .session
            .transition_to(CallState::Ended(reason.clone()))
        {
            debug!("call.finish room={}: {}", self.conversation_id, e);
        }
        *self.cancel_slot.lock().unwrap_or_else(|e| e.into_inner()) = None;
        drop(active);

        info!(
            "call.ended room={} reason={:?}",
            self.conversation_id, reason
        );
        self.last_ended = Some(reason.clone());
        self.notify(&CallState::Ended(reason));
    }

    async fn fail(&mut self, error: CallError) {
        error!("call.failed room={}: {}", self.conversation_id, error);
        self.listener.on_call_failed(&self.conversation_id, &error);
        self.finish(EndReason::Failed(error.to_string())).await;
    }

    /// Abort after the remote side already knows about the call
    async fn fail_and_notify(&mut self, error: CallError) {
        self.channel.send(self.message(SignalKind::Ended)).await;
        self.fail(error).await;
    }

    async fn abort_cancelled(&mut self, reason: EndReason) {
        if reason == EndReason::LocalHangup {
            self.channel.send(self.message(SignalKind::Ended)).await;
        }
        self.finish(reason).await;
    }

    // Local actions

    /// Caller path: `Idle --placeCall--> Ringing(caller)`, emitting `call:ring`
    pub async fn place_call(&mut self) -> CallResult<()> {
        if let Some((state, _)) = self.active_state() {
            return Err(CallError::InvalidStateTransition(format!(
                "A call is already {}",
                state
            )));
        }

        let mut session = CallSession::new(self.conversation_id.clone(), CallRole::Caller);
        if let Err(e) = self.media.connect(&mut session).await {
            self.media.close(&mut session).await;
            error!("call.failed room={}: {}", self.conversation_id, e);
            self.listener.on_call_failed(&self.conversation_id, &e);
            let reason = EndReason::Failed(e.to_string());
            self.last_ended = Some(reason.clone());
            self.notify(&CallState::Ended(reason));
            return Err(e);
        }

        session.transition_to(CallState::Ringing(CallRole::Caller))?;
        self.open(session, deadline_after(self.settings.ring_timeout));
        self.notify(&CallState::Ringing(CallRole::Caller));

        self.channel
            .send(SignalingMessage::Ring {
                conversation_id: self.conversation_id.clone(),
                from: self.settings.display_name.clone(),
            })
            .await;
        Ok(())
    }

    /// Callee path: accept the ringing call, emitting `call:accept`
    pub async fn accept(&mut self) -> CallResult<()> {
        match self.active_state() {
            Some((CallState::Ringing(CallRole::Callee), _)) => {}
            other => {
                return Err(CallError::InvalidStateTransition(format!(
                    "No incoming call to accept ({:?})",
                    other.map(|(s, _)| s.to_string())
                )))
            }
        }

        let connected = match self.active.as_mut() {
            Some(active) => self.media.connect(&mut active.session).await,
            None => return Ok(()),
        };
        if let Err(e) = connected {
            self.channel.send(self.message(SignalKind::Decline)).await;
            self.fail(e.clone()).await;
            return Err(e);
        }

        self.channel.send(self.message(SignalKind::Accept)).await;
        self.transition(
            CallState::Negotiating,
            deadline_after(self.settings.negotiation_timeout),
        )
    }

    /// Callee path: refuse the ringing call without touching the microphone
    pub async fn decline(&mut self) -> CallResult<()> {
        match self.active_state() {
            Some((CallState::Ringing(CallRole::Callee), _)) => {
                self.channel.send(self.message(SignalKind::Decline)).await;
                self.finish(EndReason::Rejected).await;
                Ok(())
            }
            other => Err(CallError::InvalidStateTransition(format!(
                "No incoming call to decline ({:?})",
                other.map(|(s, _)| s.to_string())
            ))),
        }
    }

    /// End the call from this side. No-op when nothing is open.
    pub async fn hangup(&mut self) -> CallResult<()> {
        match self.active_state() {
            None => {
                debug!("call.hangup room={} nothing open", self.conversation_id);
            }
            Some((CallState::Ringing(CallRole::Callee), _)) => {
                self.channel.send(self.message(SignalKind::Decline)).await;
                self.finish(EndReason::Rejected).await;
            }
            Some(_) => {
                self.channel.send(self.message(SignalKind::Ended)).await;
                self.finish(EndReason::LocalHangup).await;
            }
        }
        Ok(())
    }

    pub async fn set_speaker(&mut self, on: bool) {
        self.media.set_output_device(on).await;
    }

    pub async fn handle_command(&mut self, command: CallCommand) {
        let result = match command {
            CallCommand::PlaceCall => self.place_call().await,
            CallCommand::Accept => self.accept().await,
            CallCommand::Decline => self.decline().await,
            CallCommand::Hangup => self.hangup().await,
            CallCommand::SetSpeaker(on) => {
                self.set_speaker(on).await;
                Ok(())
            }
            CallCommand::Shutdown => self.hangup().await,
        };
        if let Err(e) = result {
            warn!("call.command_failed room={}: {}", self.conversation_id, e);
        }
    }

    // Remote events

    async fn handle_inbound(&mut self, inbound: Inbound) {
        match inbound {
            Inbound::Ring(from) => self.on_ring(from).await,
            Inbound::Session(session_id, message) => {
                let current = self.active.as_ref().map(|a| a.session.id());
                if current != Some(session_id) {
                    debug!(
                        "signal.stale room={} event={} session={}",
                        self.conversation_id,
                        message.kind(),
                        session_id
                    );
                    return;
                }

                match message {
                    SignalingMessage::Accept { .. } => self.on_accept().await,
                    SignalingMessage::Decline { .. } => self.on_decline().await,
                    SignalingMessage::Offer { sdp, .. } => self.on_offer(sdp).await,
                    SignalingMessage::Answer { sdp, .. } => self.on_answer(sdp).await,
                    SignalingMessage::Candidate { candidate, .. } => {
                        self.on_candidate(candidate).await
                    }
                    SignalingMessage::Ended { .. } => self.finish(EndReason::RemoteHangup).await,
                    SignalingMessage::Ring { .. } => {}
                }
            }
        }
    }

    async fn on_ring(&mut self, from: String) {
        if let Some((state, _)) = self.active_state() {
            warn!(
                "call.ring_rejected room={} already {}",
                self.conversation_id, state
            );
            self.channel.send(self.message(SignalKind::Decline)).await;
            return;
        }

        info!("call.incoming room={} from={}", self.conversation_id, from);
        let mut session = CallSession::new(self.conversation_id.clone(), CallRole::Callee)
            .with_remote_name(from.clone());
        if let Err(e) = session.transition_to(CallState::Ringing(CallRole::Callee)) {
            warn!("call.ring room={}: {}", self.conversation_id, e);
            return;
        }

        self.open(session, deadline_after(self.settings.ring_timeout));
        self.notify(&CallState::Ringing(CallRole::Callee));
        self.listener.on_incoming_call(&self.conversation_id, &from);
    }

    /// Declines end a ringing call only. Once negotiation started they come
    /// from a busy or expired prompt elsewhere in the room.
    async fn on_decline(&mut self) {
        match self.active_state() {
            Some((CallState::Ringing(_), _)) => self.finish(EndReason::Declined).await,
            Some((state, _)) => {
                debug!(
                    "call.decline_ignored room={} state={}",
                    self.conversation_id, state
                );
            }
            None => {}
        }
    }

    /// Caller: accepted, so capture, attach and offer
    async fn on_accept(&mut self) {
        if !matches!(
            self.active_state(),
            Some((CallState::Ringing(CallRole::Caller), _))
        ) {
            debug!("call.accept_ignored room={}", self.conversation_id);
            return;
        }
        if let Some(reason) = self.cancelled() {
            return self.abort_cancelled(reason).await;
        }

        if let Err(e) = self.transition(
            CallState::Negotiating,
            deadline_after(self.settings.negotiation_timeout),
        ) {
            return self.fail(e).await;
        }

        let stream = match self.media.capture_local_audio().await {
            Ok(stream) => stream,
            Err(e) => return self.fail(e).await,
        };
        if let Some(reason) = self.cancelled() {
            stream.stop_all();
            return self.abort_cancelled(reason).await;
        }

        let offer = match self.active.as_mut() {
            Some(active) => {
                match self.media.attach_tracks(&mut active.session, stream).await {
                    Ok(()) => self.media.create_offer(&mut active.session).await,
                    Err(e) => Err(e),
                }
            }
            None => {
                stream.stop_all();
                return;
            }
        };

        match offer {
            Ok(sdp) => {
                self.channel
                    .send(SignalingMessage::Offer {
                        conversation_id: self.conversation_id.clone(),
                        sdp,
                    })
                    .await
            }
            Err(e) => self.fail_and_notify(e).await,
        }
    }

    /// Callee: apply the offer, capture, attach and answer
    async fn on_offer(&mut self, sdp: SessionDescription) {
        if !matches!(
            self.active_state(),
            Some((CallState::Negotiating, CallRole::Callee))
        ) {
            debug!("call.offer_ignored room={}", self.conversation_id);
            return;
        }
        if let Some(reason) = self.cancelled() {
            return self.abort_cancelled(reason).await;
        }

        let applied = match self.active.as_mut() {
            Some(active) => {
                self.media
                    .apply_remote_description(&mut active.session, sdp)
                    .await
            }
            None => return,
        };
        if let Err(e) = applied {
            return self.fail_and_notify(e).await;
        }

        let stream = match self.media.capture_local_audio().await {
            Ok(stream) => stream,
            Err(e) => return self.fail(e).await,
        };
        if let Some(reason) = self.cancelled() {
            stream.stop_all();
            return self.abort_cancelled(reason).await;
        }

        let answer = match self.active.as_mut() {
            Some(active) => {
                match self.media.attach_tracks(&mut active.session, stream).await {
                    Ok(()) => self.media.create_answer(&mut active.session).await,
                    Err(e) => Err(e),
                }
            }
            None => {
                stream.stop_all();
                return;
            }
        };

        match answer {
            Ok(sdp) => {
                self.channel
                    .send(SignalingMessage::Answer {
                        conversation_id: self.conversation_id.clone(),
                        sdp,
                    })
                    .await;
                if let Err(e) = self.transition(CallState::Connected, None) {
                    self.fail(e).await;
                }
            }
            Err(e) => self.fail_and_notify(e).await,
        }
    }

    /// Caller: apply the answer
    async fn on_answer(&mut self, sdp: SessionDescription) {
        if !matches!(
            self.active_state(),
            Some((CallState::Negotiating, CallRole::Caller))
        ) {
            debug!("call.answer_ignored room={}", self.conversation_id);
            return;
        }

        let applied = match self.active.as_mut() {
            Some(active) => {
                self.media
                    .apply_remote_description(&mut active.session, sdp)
                    .await
            }
            None => return,
        };

        match applied {
            Ok(()) => {
                if let Err(e) = self.transition(CallState::Connected, None) {
                    self.fail(e).await;
                }
            }
            Err(e) => self.fail_and_notify(e).await,
        }
    }

    async fn on_candidate(&mut self, candidate: IceCandidate) {
        if let Some(active) = self.active.as_mut() {
            if active.session.state().is_active() {
                self.media
                    .apply_remote_candidate(&mut active.session, candidate)
                    .await;
            }
        }
    }

    /// End a session whose ring or negotiation deadline has passed
    pub async fn handle_timeout(&mut self, now: Instant) {
        let expired = self
            .active
            .as_ref()
            .and_then(|a| a.deadline)
            .map(|deadline| deadline <= now)
            .unwrap_or(false);
        if !expired {
            return;
        }

        match self.active_state() {
            Some((CallState::Ringing(CallRole::Caller), _)) => {
                info!("call.no_answer room={}", self.conversation_id);
                self.channel.send(self.message(SignalKind::Ended)).await;
                self.finish(EndReason::NoAnswer).await;
            }
            Some((CallState::Ringing(CallRole::Callee), _)) => {
                info!("call.prompt_expired room={}", self.conversation_id);
                self.channel.send(self.message(SignalKind::Decline)).await;
                self.finish(EndReason::NoAnswer).await;
            }
            Some((CallState::Negotiating, _)) => {
                self.fail_and_notify(CallError::Negotiation(
                    "Negotiation timed out".to_string(),
                ))
                .await;
            }
            _ => {
                if let Some(active) = self.active.as_mut() {
                    active.deadline = None;
                }
            }
        }
    }

    /// Process every queued inbound event; returns how many were handled
    pub async fn process_pending(&mut self) -> usize {
        let mut handled = 0;
        loop {
            let next = match self.inbox_rx.as_mut() {
                Some(rx) => rx.try_recv().ok(),
                None => None,
            };
            let Some(inbound) = next else {
                break;
            };
            self.handle_inbound(inbound).await;
            handled += 1;
        }
        handled
    }

    /// Event loop: local commands, inbound signaling and deadlines
    pub async fn run(mut self) {
        let (Some(mut commands), Some(mut inbox)) = (self.commands.take(), self.inbox_rx.take())
        else {
            warn!("call.engine room={} already running", self.conversation_id);
            return;
        };

        info!("call.engine_started room={}", self.conversation_id);
        loop {
            let deadline = self.deadline();
            tokio::select! {
                command = commands.recv() => match command {
                    Some(CallCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command).await,
                },
                Some(inbound) = inbox.recv() => self.handle_inbound(inbound).await,
                _ = sleep_until(deadline) => self.handle_timeout(Instant::now()).await,
            }
        }

        if let Err(e) = self.hangup().await {
            warn!("call.shutdown room={}: {}", self.conversation_id, e);
        }
        info!("call.engine_stopped room={}", self.conversation_id);
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_cancel_reason_wins() {
        let flag = CancelFlag::default();
        assert_eq!(flag.reason(), None);

        flag.cancel(EndReason::RemoteHangup);
        flag.cancel(EndReason::LocalHangup);
        assert_eq!(flag.reason(), Some(EndReason::RemoteHangup));
    }

    #[test]
    fn test_hangup_marks_current_session_cancelled() {
        let (handle, mailbox) = CallHandle::pair();
        let flag = CancelFlag::default();
        *mailbox.cancel.lock().unwrap() = Some(flag.clone());

        handle.hangup().unwrap();
        assert_eq!(flag.reason(), Some(EndReason::LocalHangup));
    }

    #[test]
    fn test_commands_fail_once_engine_is_gone() {
        let (handle, mailbox) = CallHandle::pair();
        drop(mailbox);

        assert!(matches!(
            handle.place_call(),
            Err(CallError::Signaling(_))
        ));
    }
}
