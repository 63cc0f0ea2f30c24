//! Call signaling wire messages

use crate::domain::call::{IceCandidate, SessionDescription};
use crate::domain::shared::value_objects::ConversationId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Signaling message types
///
/// Every message carries the conversation id it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum SignalingMessage {
    /// Caller asks the other side to pick up
    #[serde(rename = "call:ring")]
    Ring {
        #[serde(rename = "chat_id")]
        conversation_id: ConversationId,
        from: String,
    },
    /// Callee picked up
    #[serde(rename = "call:accept")]
    Accept {
        #[serde(rename = "chat_id")]
        conversation_id: ConversationId,
    },
    /// Either side refused the call
    #[serde(rename = "call:decline")]
    Decline {
        #[serde(rename = "chat_id")]
        conversation_id: ConversationId,
    },
    /// SDP offer
    #[serde(rename = "rtc:offer")]
    Offer {
        #[serde(rename = "chat_id")]
        conversation_id: ConversationId,
        sdp: SessionDescription,
    },
    /// SDP answer
    #[serde(rename = "rtc:answer")]
    Answer {
        #[serde(rename = "chat_id")]
        conversation_id: ConversationId,
        sdp: SessionDescription,
    },
    /// ICE candidate
    #[serde(rename = "rtc:candidate")]
    Candidate {
        #[serde(rename = "chat_id")]
        conversation_id: ConversationId,
        candidate: IceCandidate,
    },
    /// Call hangup
    #[serde(rename = "call:ended")]
    Ended {
        #[serde(rename = "chat_id")]
        conversation_id: ConversationId,
    },
}

impl SignalingMessage {
    pub fn conversation_id(&self) -> &ConversationId {
        match self {
            SignalingMessage::Ring { conversation_id, .. }
            | SignalingMessage::Accept { conversation_id }
            | SignalingMessage::Decline { conversation_id }
            | SignalingMessage::Offer { conversation_id, .. }
            | SignalingMessage::Answer { conversation_id, .. }
            | SignalingMessage::Candidate { conversation_id, .. }
            | SignalingMessage::Ended { conversation_id } => conversation_id,
        }
    }

    pub fn kind(&self) -> SignalKind {
        match self {
            SignalingMessage::Ring { .. } => SignalKind::Ring,
            SignalingMessage::Accept { .. } => SignalKind::Accept,
            SignalingMessage::Decline { .. } => SignalKind::Decline,
            SignalingMessage::Offer { .. } => SignalKind::Offer,
            SignalingMessage::Answer { .. } => SignalKind::Answer,
            SignalingMessage::Candidate { .. } => SignalKind::Candidate,
            SignalingMessage::Ended { .. } => SignalKind::Ended,
        }
    }
}

/// Event name of a signaling message, used to key handlers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    Ring,
    Accept,
    Decline,
    Offer,
    Answer,
    Candidate,
    Ended,
}

impl SignalKind {
    /// Every kind scoped to a single call session
    pub const SESSION_SCOPED: [SignalKind; 6] = [
        SignalKind::Accept,
        SignalKind::Decline,
        SignalKind::Offer,
        SignalKind::Answer,
        SignalKind::Candidate,
        SignalKind::Ended,
    ];

    pub fn event_name(&self) -> &'static str {
        match self {
            SignalKind::Ring => "call:ring",
            SignalKind::Accept => "call:accept",
            SignalKind::Decline => "call:decline",
            SignalKind::Offer => "rtc:offer",
            SignalKind::Answer => "rtc:answer",
            SignalKind::Candidate => "rtc:candidate",
            SignalKind::Ended => "call:ended",
        }
    }

    /// Media negotiation events, only relayed once a call is accepted
    pub fn is_media_negotiation(&self) -> bool {
        matches!(
            self,
            SignalKind::Offer | SignalKind::Answer | SignalKind::Candidate
        )
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.event_name())
    }
}

/// Non-signaling frames on the call relay connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum CallControl {
    /// Join the call room of a conversation
    #[serde(rename = "join")]
    Join {
        #[serde(rename = "chat_id")]
        conversation_id: ConversationId,
        #[serde(default)]
        room_key: Option<String>,
    },
    /// Relay refused a frame
    #[serde(rename = "error")]
    Error { code: String },
}

/// Any frame on the call relay connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CallFrame {
    Signal(SignalingMessage),
    Control(CallControl),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_wire_format() {
        let ring = SignalingMessage::Ring {
            conversation_id: "c1".into(),
            from: "Alice".to_string(),
        };
        let json = serde_json::to_value(&ring).unwrap();
        assert_eq!(json["event"], "call:ring");
        assert_eq!(json["data"]["chat_id"], "c1");
        assert_eq!(json["data"]["from"], "Alice");
    }

    #[test]
    fn test_parse_offer_frame() {
        let json = r#"{"event":"rtc:offer","data":{"chat_id":"c1","sdp":{"type":"offer","sdp":"v=0"}}}"#;
        let frame: CallFrame = serde_json::from_str(json).unwrap();
        match frame {
            CallFrame::Signal(msg) => {
                assert_eq!(msg.kind(), SignalKind::Offer);
                assert_eq!(msg.conversation_id().as_str(), "c1");
            }
            other => panic!("Expected signal, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_join_frame() {
        let json = r#"{"event":"join","data":{"chat_id":"c1","room_key":"abc"}}"#;
        let frame: CallFrame = serde_json::from_str(json).unwrap();
        assert_eq!(
            frame,
            CallFrame::Control(CallControl::Join {
                conversation_id: "c1".into(),
                room_key: Some("abc".to_string()),
            })
        );
    }

    #[test]
    fn test_unknown_event_is_rejected() {
        let json = r#"{"event":"call:transfer","data":{"chat_id":"c1"}}"#;
        assert!(serde_json::from_str::<CallFrame>(json).is_err());
    }

    #[test]
    fn test_media_negotiation_kinds() {
        assert!(SignalKind::Candidate.is_media_negotiation());
        assert!(!SignalKind::Accept.is_media_negotiation());
        assert!(!SignalKind::SESSION_SCOPED.contains(&SignalKind::Ring));
    }
}
