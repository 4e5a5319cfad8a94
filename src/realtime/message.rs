//! Realtime wire messages and the events handed to subscribers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Presence status carried by presence signals in both directions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Away,
    Offline,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    #[serde(default)]
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingIndicator {
    pub conversation_id: String,
    pub user_id: String,
    pub is_typing: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceUpdate {
    pub user_id: String,
    pub status: PresenceStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionUpdate {
    pub message_id: String,
    pub user_id: String,
    pub emoji: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default)]
    pub data: Value,
}

/// Inbound frame from the server, discriminated by its `type` field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    Message(ChatMessage),
    Typing(TypingIndicator),
    Presence(PresenceUpdate),
    Reaction(ReactionUpdate),
    Notification(NotificationPayload),
    Pong,
}

/// Why an inbound frame could not be turned into a [`ServerEvent`]
#[derive(Debug, Error)]
pub enum InboundError {
    #[error("frame is not a JSON object: {0}")]
    NotJson(#[source] serde_json::Error),

    #[error("frame has no string `type` field")]
    MissingType,

    #[error("unknown event type `{0}`")]
    UnknownType(String),

    #[error("malformed `{event_type}` event: {source}")]
    Malformed {
        event_type: String,
        #[source]
        source: serde_json::Error,
    },
}

impl ServerEvent {
    /// Parse one text frame.
    pub fn parse(frame: &str) -> Result<Self, InboundError> {
        let value: Value = serde_json::from_str(frame).map_err(InboundError::NotJson)?;

        let event_type = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(InboundError::MissingType)?
            .to_string();

        if EventKind::from_wire(&event_type).is_none() {
            return Err(InboundError::UnknownType(event_type));
        }

        serde_json::from_value(value).map_err(|source| InboundError::Malformed { event_type, source })
    }

    pub fn kind(&self) -> EventKind {
        match self {
            ServerEvent::Message(_) => EventKind::Message,
            ServerEvent::Typing(_) => EventKind::Typing,
            ServerEvent::Presence(_) => EventKind::Presence,
            ServerEvent::Reaction(_) => EventKind::Reaction,
            ServerEvent::Notification(_) => EventKind::Notification,
            ServerEvent::Pong => EventKind::Pong,
        }
    }
}

/// Event delivered to registered handlers: a server event or a connection
/// lifecycle change.
#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeEvent {
    Connected {
        session_id: String,
    },
    Disconnected {
        session_id: String,
        /// True when the close came from `disconnect()`
        requested: bool,
    },
    ReconnectScheduled {
        session_id: String,
        attempt: u32,
        delay_ms: u64,
    },
    /// Terminal: no further reconnects are scheduled
    ReconnectFailed {
        session_id: String,
        attempts: u32,
    },
    Server(ServerEvent),
}

impl RealtimeEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            RealtimeEvent::Connected { .. } => EventKind::Connected,
            RealtimeEvent::Disconnected { .. } => EventKind::Disconnected,
            RealtimeEvent::ReconnectScheduled { .. } => EventKind::ReconnectScheduled,
            RealtimeEvent::ReconnectFailed { .. } => EventKind::ReconnectFailed,
            RealtimeEvent::Server(event) => event.kind(),
        }
    }
}

/// Registry key for handlers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connected,
    Disconnected,
    ReconnectScheduled,
    ReconnectFailed,
    Message,
    Typing,
    Presence,
    Reaction,
    Notification,
    Pong,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Connected => "connected",
            EventKind::Disconnected => "disconnected",
            EventKind::ReconnectScheduled => "reconnectScheduled",
            EventKind::ReconnectFailed => "reconnectFailed",
            EventKind::Message => "message",
            EventKind::Typing => "typing",
            EventKind::Presence => "presence",
            EventKind::Reaction => "reaction",
            EventKind::Notification => "notification",
            EventKind::Pong => "pong",
        }
    }

    /// Map an inbound `type` value to its kind. Lifecycle kinds are never
    /// accepted from the wire.
    pub fn from_wire(event_type: &str) -> Option<Self> {
        match event_type {
            "message" => Some(EventKind::Message),
            "typing" => Some(EventKind::Typing),
            "presence" => Some(EventKind::Presence),
            "reaction" => Some(EventKind::Reaction),
            "notification" => Some(EventKind::Notification),
            "pong" => Some(EventKind::Pong),
            _ => None,
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outbound frame sent by the client
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Presence {
        status: PresenceStatus,
    },
    Typing {
        #[serde(rename = "conversationId")]
        conversation_id: String,
        #[serde(rename = "isTyping")]
        is_typing: bool,
    },
    Reaction {
        #[serde(rename = "messageId")]
        message_id: String,
        emoji: String,
    },
    Ping,
    /// Forwarded verbatim
    #[serde(skip)]
    Custom(Value),
}

impl ClientMessage {
    pub fn presence(status: PresenceStatus) -> Self {
        ClientMessage::Presence { status }
    }

    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        match self {
            ClientMessage::Custom(value) => serde_json::to_string(value),
            other => serde_json::to_string(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_typed_events() {
        let event = ServerEvent::parse(
            r#"{"type":"typing","conversationId":"c1","userId":"u2","isTyping":true}"#,
        )
        .unwrap();
        assert_eq!(
            event,
            ServerEvent::Typing(TypingIndicator {
                conversation_id: "c1".to_string(),
                user_id: "u2".to_string(),
                is_typing: true,
            })
        );
        assert_eq!(event.kind(), EventKind::Typing);

        let pong = ServerEvent::parse(r#"{"type":"pong"}"#).unwrap();
        assert_eq!(pong, ServerEvent::Pong);
    }

    #[test]
    fn test_parse_notification_keeps_data() {
        let frame = json!({
            "type": "notification",
            "id": "n1",
            "title": "New follower",
            "data": {"followerId": "u7"}
        })
        .to_string();

        match ServerEvent::parse(&frame).unwrap() {
            ServerEvent::Notification(n) => {
                assert_eq!(n.id, "n1");
                assert_eq!(n.data["followerId"], "u7");
                assert!(n.body.is_none());
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_parse_rejections() {
        assert!(matches!(ServerEvent::parse("not json"), Err(InboundError::NotJson(_))));
        assert!(matches!(ServerEvent::parse(r#"{"id":1}"#), Err(InboundError::MissingType)));
        assert!(matches!(
            ServerEvent::parse(r#"{"type":"call_offer"}"#),
            Err(InboundError::UnknownType(t)) if t == "call_offer"
        ));
        assert!(matches!(
            ServerEvent::parse(r#"{"type":"connected"}"#),
            Err(InboundError::UnknownType(_))
        ));
        assert!(matches!(
            ServerEvent::parse(r#"{"type":"reaction","emoji":"+1"}"#),
            Err(InboundError::Malformed { .. })
        ));
    }

    #[test]
    fn test_client_frames() {
        let presence = ClientMessage::presence(PresenceStatus::Online).to_frame().unwrap();
        assert_eq!(presence, r#"{"type":"presence","status":"online"}"#);

        let typing = ClientMessage::Typing {
            conversation_id: "c1".to_string(),
            is_typing: false,
        };
        let value: Value = serde_json::from_str(&typing.to_frame().unwrap()).unwrap();
        assert_eq!(value, json!({"type": "typing", "conversationId": "c1", "isTyping": false}));

        let custom = ClientMessage::Custom(json!({"type": "call_end", "callId": "x"}));
        let value: Value = serde_json::from_str(&custom.to_frame().unwrap()).unwrap();
        assert_eq!(value["type"], "call_end");
        assert_eq!(value["callId"], "x");
    }

    #[test]
    fn test_event_kinds() {
        let event = RealtimeEvent::ReconnectScheduled {
            session_id: "s1".to_string(),
            attempt: 1,
            delay_ms: 1000,
        };
        assert_eq!(event.kind(), EventKind::ReconnectScheduled);
        assert_eq!(event.kind().to_string(), "reconnectScheduled");
        assert_eq!(EventKind::from_wire("message"), Some(EventKind::Message));
    }
}
