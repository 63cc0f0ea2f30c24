//! Fan-out of relayed frames to every connection on the server

use crate::domain::shared::value_objects::{ConversationId, PeerId};
use axum::extract::ws::{Message, WebSocket};
use futures::stream::SplitSink;
use futures::SinkExt;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

/// A serialized frame addressed to every other member of a room
#[derive(Debug, Clone)]
pub struct Envelope {
    pub room: ConversationId,
    pub from: PeerId,
    pub text: Arc<str>,
}

impl Envelope {
    /// Whether `peer`, given its joined rooms, should receive this frame
    pub fn is_for(&self, peer: PeerId, joined: impl FnOnce(&ConversationId) -> bool) -> bool {
        self.from != peer && joined(&self.room)
    }
}

#[derive(Clone)]
pub struct RelayHub {
    tx: broadcast::Sender<Envelope>,
}

impl RelayHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1024);
        Self { tx }
    }

    pub fn publish(&self, room: &ConversationId, from: PeerId, text: impl Into<Arc<str>>) {
        // No receivers is fine
        let _ = self.tx.send(Envelope {
            room: room.clone(),
            from,
            text: text.into(),
        });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for RelayHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Rooms a single connection has joined
#[derive(Clone, Default)]
pub struct JoinedRooms(Arc<Mutex<HashSet<ConversationId>>>);

impl JoinedRooms {
    pub fn insert(&self, room: ConversationId) {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).insert(room);
    }

    pub fn contains(&self, room: &ConversationId) -> bool {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).contains(room)
    }
}

/// Write hub traffic for the connection's rooms, plus direct replies, to the socket
pub async fn forward_to_socket(
    mut sink: SplitSink<WebSocket, Message>,
    mut hub: broadcast::Receiver<Envelope>,
    peer: PeerId,
    joined: JoinedRooms,
    mut replies: mpsc::UnboundedReceiver<String>,
) {
    loop {
        let text = tokio::select! {
            envelope = hub.recv() => match envelope {
                Ok(envelope) => {
                    if !envelope.is_for(peer, |room| joined.contains(room)) {
                        continue;
                    }
                    envelope.text.to_string()
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("relay.lagged peer={} skipped={}", peer, skipped);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            reply = replies.recv() => match reply {
                Some(text) => text,
                None => break,
            },
        };

        if sink.send(Message::Text(text)).await.is_err() {
            debug!("relay.send_failed peer={}", peer);
            break;
        }
    }
}
