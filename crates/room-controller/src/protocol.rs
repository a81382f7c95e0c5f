//! Wire envelope shared by every frame on a client connection.
//!
//! Every frame is a JSON object `{type, roomID, userID, body}`. The `body`
//! is opaque to the hub: chat bodies are relayed verbatim, signaling bodies
//! are handed to the relay as blobs.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::RcError;

/// Message tags understood by the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageKind {
    /// Room-scoped chat payload, recorded and fanned out.
    Chat,
    /// Room membership event (joined/left), emitted by the hub.
    Presence,
    /// Client offer for the relay; answered with `SignalingAnswer`.
    SignalingOffer,
    /// Server→client answer; client→server it acknowledges establishment.
    SignalingAnswer,
    /// Trickled ICE candidate for the relay.
    IceCandidate,
    /// Application-level liveness probe.
    Ping,
    /// Reply to a probe; any inbound frame refreshes the read deadline.
    Pong,
}

impl MessageKind {
    /// Tag as it appears on the wire, for log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Chat => "chat",
            MessageKind::Presence => "presence",
            MessageKind::SignalingOffer => "signaling-offer",
            MessageKind::SignalingAnswer => "signaling-answer",
            MessageKind::IceCandidate => "ice-candidate",
            MessageKind::Ping => "ping",
            MessageKind::Pong => "pong",
        }
    }
}

/// One frame on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Message tag.
    #[serde(rename = "type")]
    pub kind: MessageKind,

    /// Room the frame is scoped to. Empty before room association.
    #[serde(rename = "roomID", default, skip_serializing_if = "String::is_empty")]
    pub room_id: String,

    /// Subject user: the sender for inbound frames, the addressee or
    /// event subject for outbound ones.
    #[serde(rename = "userID", default, skip_serializing_if = "String::is_empty")]
    pub user_id: String,

    /// Opaque payload.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub body: Value,
}

impl Envelope {
    /// Parse one inbound frame.
    pub fn parse(frame: &str) -> Result<Self, RcError> {
        serde_json::from_str(frame)
            .map_err(|e| RcError::MalformedInput(format!("invalid envelope: {e}")))
    }

    /// Serialize for the wire. Envelopes built by this module always
    /// serialize; a failure is reported as `Internal` rather than panicking.
    pub fn encode(&self) -> Result<String, RcError> {
        serde_json::to_string(self)
            .map_err(|e| RcError::Internal(format!("envelope encode failed: {e}")))
    }

    /// Chat frame as re-broadcast to a room.
    pub fn chat(room_id: &str, user_id: &str, body: Value) -> Self {
        Envelope {
            kind: MessageKind::Chat,
            room_id: room_id.to_string(),
            user_id: user_id.to_string(),
            body,
        }
    }

    /// Presence event (`joined` or `left`) for a room member.
    pub fn presence(room_id: &str, user_id: &str, event: PresenceEvent) -> Self {
        Envelope {
            kind: MessageKind::Presence,
            room_id: room_id.to_string(),
            user_id: user_id.to_string(),
            body: serde_json::json!({ "event": event.as_str() }),
        }
    }

    /// Answer produced by the relay, addressed back to the offering user.
    pub fn signaling_answer(room_id: &str, user_id: &str, answer: Value) -> Self {
        Envelope {
            kind: MessageKind::SignalingAnswer,
            room_id: room_id.to_string(),
            user_id: user_id.to_string(),
            body: answer,
        }
    }

    /// Liveness probe emitted by a connection's writer.
    pub fn ping() -> Self {
        Envelope {
            kind: MessageKind::Ping,
            room_id: String::new(),
            user_id: String::new(),
            body: Value::Null,
        }
    }

    /// Reply to an inbound `ping`.
    pub fn pong() -> Self {
        Envelope {
            kind: MessageKind::Pong,
            room_id: String::new(),
            user_id: String::new(),
            body: Value::Null,
        }
    }
}

/// Body of a presence envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceEvent {
    Joined,
    Left,
}

impl PresenceEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            PresenceEvent::Joined => "joined",
            PresenceEvent::Left => "left",
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_chat_frame() {
        let frame = r#"{"type":"chat","roomID":"r1","userID":"alice","body":{"text":"hi"}}"#;
        let envelope = Envelope::parse(frame).unwrap();

        assert_eq!(envelope.kind, MessageKind::Chat);
        assert_eq!(envelope.room_id, "r1");
        assert_eq!(envelope.user_id, "alice");
        assert_eq!(envelope.body.get("text").and_then(Value::as_str), Some("hi"));
    }

    #[test]
    fn test_parse_kebab_case_tags() {
        for (tag, kind) in [
            ("signaling-offer", MessageKind::SignalingOffer),
            ("signaling-answer", MessageKind::SignalingAnswer),
            ("ice-candidate", MessageKind::IceCandidate),
            ("presence", MessageKind::Presence),
            ("ping", MessageKind::Ping),
            ("pong", MessageKind::Pong),
        ] {
            let frame = format!(r#"{{"type":"{tag}"}}"#);
            let envelope = Envelope::parse(&frame).unwrap();
            assert_eq!(envelope.kind, kind, "tag {tag}");
            assert!(envelope.room_id.is_empty());
        }
    }

    #[test]
    fn test_parse_unknown_tag_is_malformed() {
        let err = Envelope::parse(r#"{"type":"shout","roomID":"r1"}"#).unwrap_err();
        assert!(matches!(err, RcError::MalformedInput(_)));
    }

    #[test]
    fn test_parse_non_json_is_malformed() {
        let err = Envelope::parse("not json at all").unwrap_err();
        assert!(matches!(err, RcError::MalformedInput(_)));
    }

    #[test]
    fn test_encode_skips_empty_fields() {
        let encoded = Envelope::ping().encode().unwrap();
        assert_eq!(encoded, r#"{"type":"ping"}"#);
    }

    #[test]
    fn test_presence_body() {
        let envelope = Envelope::presence("r1", "bob", PresenceEvent::Left);
        let encoded = envelope.encode().unwrap();
        let parsed = Envelope::parse(&encoded).unwrap();

        assert_eq!(parsed.kind, MessageKind::Presence);
        assert_eq!(parsed.body.get("event").and_then(Value::as_str), Some("left"));
        assert_eq!(parsed.user_id, "bob");
    }

    #[test]
    fn test_signaling_answer_embeds_answer_body() {
        let answer = serde_json::json!({"type": "answer", "sdp": "v=0"});
        let envelope = Envelope::signaling_answer("r1", "alice", answer);

        let encoded = envelope.encode().unwrap();
        let parsed = Envelope::parse(&encoded).unwrap();
        assert_eq!(parsed.kind, MessageKind::SignalingAnswer);
        assert_eq!(parsed.body.get("sdp").and_then(Value::as_str), Some("v=0"));
    }
}
