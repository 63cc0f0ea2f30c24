//! Signaling Channel Adapter
//!
//! Conversation-scoped wrapper around a bidirectional event transport.
//! Handlers are additive: every handler registered for an event fires.
//! Callers that want exactly-once processing per session hold a
//! [`HandlerGuard`], which deregisters its handlers when dropped.

use crate::domain::shared::result::CallResult;
use crate::domain::shared::value_objects::ConversationId;
use crate::domain::signaling::{SignalKind, SignalingMessage};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

/// Outbound half of the real-time transport
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SignalingTransport: Send + Sync {
    /// Hand a message to the transport. No acknowledgement is expected.
    async fn send(&self, message: SignalingMessage) -> CallResult<()>;
}

pub type SignalHandler = Arc<dyn Fn(&SignalingMessage) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

type HandlerTable = HashMap<SignalKind, Vec<(HandlerId, SignalHandler)>>;

/// Named send/receive of signaling events for one conversation
pub struct SignalingChannel {
    conversation_id: ConversationId,
    transport: Arc<dyn SignalingTransport>,
    handlers: RwLock<HandlerTable>,
    next_id: AtomicU64,
}

impl SignalingChannel {
    pub fn new(conversation_id: ConversationId, transport: Arc<dyn SignalingTransport>) -> Self {
        Self {
            conversation_id,
            transport,
            handlers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn conversation_id(&self) -> &ConversationId {
        &self.conversation_id
    }

    /// Fire-and-forget send. Transport failures are logged, never retried.
    pub async fn send(&self, message: SignalingMessage) {
        let kind = message.kind();
        debug!("signal.send room={} event={}", self.conversation_id, kind);
        if let Err(e) = self.transport.send(message).await {
            warn!(
                "signal.send_failed room={} event={}: {}",
                self.conversation_id, kind, e
            );
        }
    }

    /// Register a handler for one event name
    pub fn on<F>(&self, kind: SignalKind, handler: F) -> HandlerId
    where
        F: Fn(&SignalingMessage) + Send + Sync + 'static,
    {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut handlers = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        handlers
            .entry(kind)
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Remove a previously registered handler
    pub fn off(&self, id: HandlerId) {
        let mut handlers = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        for list in handlers.values_mut() {
            list.retain(|(hid, _)| *hid != id);
        }
        handlers.retain(|_, list| !list.is_empty());
    }

    pub fn handler_count(&self, kind: SignalKind) -> usize {
        let handlers = self.handlers.read().unwrap_or_else(|e| e.into_inner());
        handlers.get(&kind).map(Vec::len).unwrap_or(0)
    }

    /// Deliver an inbound message to every handler registered for its event.
    ///
    /// Messages for another conversation are dropped. Returns the number
    /// of handlers invoked.
    pub fn dispatch(&self, message: &SignalingMessage) -> usize {
        if message.conversation_id() != &self.conversation_id {
            debug!(
                "signal.foreign room={} got={}",
                self.conversation_id,
                message.conversation_id()
            );
            return 0;
        }

        // Handlers may register or deregister while running
        let matching: Vec<SignalHandler> = {
            let handlers = self.handlers.read().unwrap_or_else(|e| e.into_inner());
            handlers
                .get(&message.kind())
                .map(|list| list.iter().map(|(_, h)| h.clone()).collect())
                .unwrap_or_default()
        };

        for handler in &matching {
            handler(message);
        }
        matching.len()
    }
}

/// Owns a set of handler registrations and removes them on drop
pub struct HandlerGuard {
    channel: Arc<SignalingChannel>,
    ids: Vec<HandlerId>,
}

impl HandlerGuard {
    pub fn new(channel: Arc<SignalingChannel>) -> Self {
        Self {
            channel,
            ids: Vec::new(),
        }
    }

    pub fn on<F>(&mut self, kind: SignalKind, handler: F)
    where
        F: Fn(&SignalingMessage) + Send + Sync + 'static,
    {
        let id = self.channel.on(kind, handler);
        self.ids.push(id);
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl Drop for HandlerGuard {
    fn drop(&mut self) {
        for id in self.ids.drain(..) {
            self.channel.off(id);
        }
    }
}
