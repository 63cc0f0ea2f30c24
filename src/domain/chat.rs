//! Chat messages that share a conversation with call signaling

use crate::domain::shared::error::DomainError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::ConversationId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const MAX_NAME_LEN: usize = 50;
pub const MAX_TEXT_LEN: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    /// Visitor side of the widget
    User,
    Admin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    /// Content is a data URL
    Image,
    /// Content is a data URL
    Audio,
}

/// Message relayed to the other side of a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(rename = "chat_id")]
    pub conversation_id: ConversationId,
    pub role: ChatRole,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(rename = "text")]
    pub content: String,
    pub name: String,
    pub timestamp: DateTime<Utc>,
}

/// Frames on the chat relay connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ChatFrame {
    #[serde(rename = "join")]
    Join {
        #[serde(rename = "chat_id")]
        conversation_id: ConversationId,
        #[serde(default)]
        name: Option<String>,
    },
    #[serde(rename = "send")]
    Send {
        #[serde(rename = "chat_id")]
        conversation_id: ConversationId,
        role: String,
        #[serde(rename = "type")]
        kind: String,
        #[serde(default)]
        text: String,
        #[serde(default)]
        name: Option<String>,
    },
    #[serde(rename = "chat:message")]
    Message(ChatMessage),
    #[serde(rename = "room:key")]
    RoomKey { room_key: String },
    #[serde(rename = "error")]
    Error { msg: String },
}

/// Strip markup and bound the length of user-provided text
pub fn sanitize(text: &str, max_len: usize) -> Result<String> {
    let len = text.chars().count();
    if len == 0 || len > max_len {
        return Err(DomainError::ValidationError(format!(
            "Text length must be 1-{}",
            max_len
        )));
    }

    let mut out = String::with_capacity(text.len());
    let mut in_tag = false;
    for c in text.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    Ok(out)
}

pub fn parse_role(role: &str) -> Result<ChatRole> {
    match role {
        "user" => Ok(ChatRole::User),
        "admin" => Ok(ChatRole::Admin),
        _ => Err(DomainError::ValidationError("Invalid role".to_string())),
    }
}

pub fn parse_kind(kind: &str) -> Result<MessageKind> {
    match kind {
        "text" => Ok(MessageKind::Text),
        "image" => Ok(MessageKind::Image),
        "audio" => Ok(MessageKind::Audio),
        _ => Err(DomainError::ValidationError("Invalid type".to_string())),
    }
}

impl ChatMessage {
    /// Validate a `send` frame into a relayable message
    pub fn from_send(
        conversation_id: ConversationId,
        role: &str,
        kind: &str,
        text: &str,
        name: Option<&str>,
    ) -> Result<Self> {
        if conversation_id.is_empty() {
            return Err(DomainError::ValidationError("Missing chat_id".to_string()));
        }
        let role = parse_role(role)?;
        let kind = parse_kind(kind)?;
        let content = match kind {
            MessageKind::Text => sanitize(text, MAX_TEXT_LEN)?,
            MessageKind::Image | MessageKind::Audio => text.to_string(),
        };
        let name = sanitize(name.unwrap_or("Customer"), MAX_NAME_LEN)?;

        Ok(Self {
            conversation_id,
            role,
            kind,
            content,
            name,
            timestamp: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_strips_markup() {
        assert_eq!(sanitize("<b>hi</b> there", 500).unwrap(), "hi there");
        assert!(sanitize("", 500).is_err());
        assert!(sanitize(&"x".repeat(51), MAX_NAME_LEN).is_err());
    }

    #[test]
    fn test_from_send_validates_role_and_type() {
        let ok = ChatMessage::from_send("c1".into(), "admin", "text", "hello", Some("Support"));
        assert_eq!(ok.unwrap().role, ChatRole::Admin);

        let bad_role = ChatMessage::from_send("c1".into(), "root", "text", "hello", None);
        assert_eq!(
            bad_role,
            Err(DomainError::ValidationError("Invalid role".to_string()))
        );

        let bad_type = ChatMessage::from_send("c1".into(), "user", "video", "x", None);
        assert!(bad_type.is_err());
    }

    #[test]
    fn test_data_urls_are_not_length_limited() {
        let image = format!("data:image/png;base64,{}", "A".repeat(2000));
        let msg = ChatMessage::from_send("c1".into(), "user", "image", &image, None).unwrap();
        assert_eq!(msg.content, image);
        assert_eq!(msg.name, "Customer");
    }

    #[test]
    fn test_message_wire_shape() {
        let msg = ChatMessage::from_send("c1".into(), "user", "text", "hi", Some("Ann")).unwrap();
        let json = serde_json::to_value(ChatFrame::Message(msg)).unwrap();
        assert_eq!(json["event"], "chat:message");
        assert_eq!(json["data"]["type"], "text");
        assert_eq!(json["data"]["text"], "hi");
    }
}
