//! Chat relay sharing the conversation id with call signaling

use super::hub::{forward_to_socket, JoinedRooms};
use super::metrics_handler::record_chat_message;
use super::state::AppState;
use crate::domain::chat::{sanitize, ChatFrame, ChatMessage, MAX_NAME_LEN};
use crate::domain::shared::error::DomainError;
use crate::domain::shared::value_objects::PeerId;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

fn error_frame(e: DomainError) -> ChatFrame {
    let msg = match e {
        DomainError::ValidationError(msg) => msg,
        other => other.to_string(),
    };
    ChatFrame::Error { msg }
}

/// Handle one chat frame; returns the reply for the sender, if any
pub fn relay_chat_frame(
    state: &AppState,
    peer: PeerId,
    joined: &JoinedRooms,
    frame: ChatFrame,
) -> Option<ChatFrame> {
    match frame {
        ChatFrame::Join {
            conversation_id,
            name,
        } => {
            if conversation_id.is_empty() {
                return Some(error_frame(DomainError::ValidationError(
                    "Missing chat_id".to_string(),
                )));
            }
            let name = match sanitize(name.as_deref().unwrap_or("Customer"), MAX_NAME_LEN) {
                Ok(name) => name,
                Err(e) => {
                    warn!("chat.join_invalid room={}: {}", conversation_id, e);
                    return Some(error_frame(e));
                }
            };

            info!("chat.joined room={} name={}", conversation_id, name);
            let room_key = state.keys.key_for(&conversation_id);
            joined.insert(conversation_id);
            Some(ChatFrame::RoomKey { room_key })
        }
        ChatFrame::Send {
            conversation_id,
            role,
            kind,
            text,
            name,
        } => {
            let message =
                match ChatMessage::from_send(conversation_id, &role, &kind, &text, name.as_deref())
                {
                    Ok(message) => message,
                    Err(e) => {
                        warn!("chat.send_invalid: {}", e);
                        return Some(error_frame(e));
                    }
                };

            let room = message.conversation_id.clone();
            let kind = message.kind;
            match serde_json::to_string(&ChatFrame::Message(message)) {
                Ok(text) => {
                    debug!("chat.message room={} kind={:?}", room, kind);
                    state.chat_hub.publish(&room, peer, text);
                    record_chat_message(kind);
                    None
                }
                Err(e) => Some(ChatFrame::Error { msg: e.to_string() }),
            }
        }
        // Server-to-client frames
        ChatFrame::Message(_) | ChatFrame::RoomKey { .. } | ChatFrame::Error { .. } => None,
    }
}

/// WebSocket handler for `/chat`
pub async fn chat_ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let peer = PeerId::new();
    let (sender, mut receiver) = socket.split();
    let joined = JoinedRooms::default();
    let (reply_tx, reply_rx) = mpsc::unbounded_channel::<String>();

    debug!("chat.connected peer={}", peer);

    let mut send_task = tokio::spawn(forward_to_socket(
        sender,
        state.chat_hub.subscribe(),
        peer,
        joined.clone(),
        reply_rx,
    ));

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    let reply = match serde_json::from_str::<ChatFrame>(&text) {
                        Ok(frame) => relay_chat_frame(&state, peer, &joined, frame),
                        Err(e) => Some(ChatFrame::Error {
                            msg: format!("Invalid frame: {}", e),
                        }),
                    };
                    if let Some(reply) = reply {
                        if let Ok(text) = serde_json::to_string(&reply) {
                            let _ = reply_tx.send(text);
                        }
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

    debug!("chat.disconnected peer={}", peer);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::domain::shared::value_objects::ConversationId;

    fn join(room: &str, name: Option<&str>) -> ChatFrame {
        ChatFrame::Join {
            conversation_id: room.into(),
            name: name.map(str::to_string),
        }
    }

    #[test]
    fn test_join_replies_with_room_key() {
        let state = AppState::new(Config::default());
        let joined = JoinedRooms::default();

        let reply = relay_chat_frame(&state, PeerId::new(), &joined, join("c1", Some("Ann")));

        let expected = state.keys.key_for(&ConversationId::new("c1"));
        assert_eq!(reply, Some(ChatFrame::RoomKey { room_key: expected }));
        assert!(joined.contains(&ConversationId::new("c1")));
    }

    #[test]
    fn test_join_rejects_long_name() {
        let state = AppState::new(Config::default());
        let joined = JoinedRooms::default();
        let name = "x".repeat(51);

        let reply = relay_chat_frame(&state, PeerId::new(), &joined, join("c1", Some(&name)));

        assert!(matches!(reply, Some(ChatFrame::Error { .. })));
        assert!(!joined.contains(&ConversationId::new("c1")));
    }

    #[tokio::test]
    async fn test_send_relays_sanitized_message() {
        let state = AppState::new(Config::default());
        let mut rx = state.chat_hub.subscribe();
        let frame = ChatFrame::Send {
            conversation_id: "c1".into(),
            role: "user".to_string(),
            kind: "text".to_string(),
            text: "hi <b>there</b>".to_string(),
            name: None,
        };

        let reply = relay_chat_frame(&state, PeerId::new(), &JoinedRooms::default(), frame);
        assert!(reply.is_none());

        let envelope = rx.recv().await.unwrap();
        let relayed: ChatFrame = serde_json::from_str(&envelope.text).unwrap();
        match relayed {
            ChatFrame::Message(message) => {
                assert_eq!(message.content, "hi there");
                assert_eq!(message.name, "Customer");
            }
            other => panic!("Expected chat:message, got {:?}", other),
        }
    }

    #[test]
    fn test_send_rejects_unknown_role() {
        let state = AppState::new(Config::default());
        let frame = ChatFrame::Send {
            conversation_id: "c1".into(),
            role: "bot".to_string(),
            kind: "text".to_string(),
            text: "hello".to_string(),
            name: None,
        };

        let reply = relay_chat_frame(&state, PeerId::new(), &JoinedRooms::default(), frame);
        assert_eq!(
            reply,
            Some(ChatFrame::Error {
                msg: "Invalid role".to_string()
            })
        );
    }
}
