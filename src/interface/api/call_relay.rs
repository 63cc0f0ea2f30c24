//! Call signaling relay
//!
//! One websocket per widget or agent console. A connection joins the call
//! room of a conversation, then every signaling frame it sends is relayed
//! to the other members of that room.

use super::hub::{forward_to_socket, JoinedRooms};
use super::metrics_handler::{record_signal_blocked, record_signal_relayed, update_call_rooms};
use super::state::AppState;
use crate::domain::shared::error::DomainError;
use crate::domain::shared::value_objects::{ConversationId, PeerId};
use crate::domain::signaling::{CallControl, CallFrame, SignalKind, SignalingMessage};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// What the relay did with one inbound frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    Joined(ConversationId),
    Relayed(SignalKind),
    /// Media negotiation before the call was accepted
    Blocked(SignalKind),
    Dropped,
    /// Refused; the code is sent back to the sender
    Rejected(&'static str),
}

/// Apply the relay rules to one frame from `peer`
pub async fn relay_call_frame(state: &AppState, peer: PeerId, frame: CallFrame) -> RelayOutcome {
    match frame {
        CallFrame::Control(CallControl::Join {
            conversation_id,
            room_key,
        }) => join(state, peer, conversation_id, room_key).await,
        CallFrame::Control(CallControl::Error { .. }) => RelayOutcome::Dropped,
        CallFrame::Signal(message) => relay_signal(state, peer, message).await,
    }
}

async fn join(
    state: &AppState,
    peer: PeerId,
    room: ConversationId,
    room_key: Option<String>,
) -> RelayOutcome {
    if !state.config.calls.enabled {
        return RelayOutcome::Rejected(DomainError::CallsDisabled.code());
    }
    if room.is_empty() {
        return RelayOutcome::Rejected(
            DomainError::ValidationError("Missing chat_id".to_string()).code(),
        );
    }
    if state.config.calls.require_room_key {
        let valid = room_key
            .as_deref()
            .map(|key| state.keys.verify(&room, key))
            .unwrap_or(false);
        if !valid {
            warn!("call.join_denied room={} peer={}", room, peer);
            return RelayOutcome::Rejected(DomainError::Unauthorized(room.to_string()).code());
        }
    }

    match state.rooms.join(&room, peer).await {
        Ok(()) => {
            update_call_rooms(state.rooms.room_count().await);
            RelayOutcome::Joined(room)
        }
        Err(e) => {
            warn!("call.join_failed room={} peer={}: {}", room, peer, e);
            RelayOutcome::Rejected(e.code())
        }
    }
}

async fn relay_signal(state: &AppState, peer: PeerId, message: SignalingMessage) -> RelayOutcome {
    let kind = message.kind();
    let room = message.conversation_id().clone();

    if !state.config.calls.enabled {
        debug!("call.disabled dropped event={} room={}", kind, room);
        return RelayOutcome::Dropped;
    }
    if kind == SignalKind::Ended && !state.rooms.contains(&room).await {
        warn!("call.ended unknown room={}", room);
        return RelayOutcome::Dropped;
    }
    if !state.rooms.is_member(&room, peer).await {
        warn!("call.not_joined event={} room={} peer={}", kind, room, peer);
        return RelayOutcome::Rejected(DomainError::NotJoined(room.to_string()).code());
    }

    match kind {
        SignalKind::Accept => state.rooms.mark_accepted(&room).await,
        SignalKind::Ended => {
            state.rooms.end_call(&room).await;
        }
        kind if kind.is_media_negotiation() => {
            if !state.rooms.is_accepted(&room).await {
                warn!("rtc.blocked event={} room={}", kind, room);
                record_signal_blocked(kind);
                return RelayOutcome::Blocked(kind);
            }
        }
        _ => {}
    }

    match serde_json::to_string(&CallFrame::Signal(message)) {
        Ok(text) => {
            if kind == SignalKind::Ring {
                info!("call.ring room={}", room);
            } else {
                debug!("call.relay event={} room={}", kind, room);
            }
            state.call_hub.publish(&room, peer, text);
            record_signal_relayed(kind);
            RelayOutcome::Relayed(kind)
        }
        Err(e) => {
            error!("call.encode_failed event={}: {}", kind, e);
            RelayOutcome::Dropped
        }
    }
}

/// Remove a closed connection from every room
pub async fn disconnect(state: &AppState, peer: PeerId) {
    let emptied = state.rooms.leave_all(peer).await;
    if !emptied.is_empty() {
        debug!("call.rooms_closed peer={} rooms={}", peer, emptied.len());
    }
    update_call_rooms(state.rooms.room_count().await);
}

/// WebSocket handler for `/call`
pub async fn call_ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let peer = PeerId::new();
    let (sender, mut receiver) = socket.split();
    let joined = JoinedRooms::default();
    let (reply_tx, reply_rx) = mpsc::unbounded_channel::<String>();

    info!("call.connected peer={}", peer);

    let mut send_task = tokio::spawn(forward_to_socket(
        sender,
        state.call_hub.subscribe(),
        peer,
        joined.clone(),
        reply_rx,
    ));

    let recv_state = state.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    let frame = match serde_json::from_str::<CallFrame>(&text) {
                        Ok(frame) => frame,
                        Err(e) => {
                            debug!("call.unparsed peer={}: {}", peer, e);
                            continue;
                        }
                    };
                    match relay_call_frame(&recv_state, peer, frame).await {
                        RelayOutcome::Joined(room) => {
                            joined.insert(room);
                        }
                        RelayOutcome::Rejected(code) => {
                            let reply = CallFrame::Control(CallControl::Error {
                                code: code.to_string(),
                            });
                            if let Ok(text) = serde_json::to_string(&reply) {
                                let _ = reply_tx.send(text);
                            }
                        }
                        _ => {}
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    }

    disconnect(&state, peer).await;
    info!("call.disconnected peer={}", peer);
}
