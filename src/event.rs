//! Inbound events decoded from raw Bot API updates.
//!
//! Only the fields the relay needs are decoded; the full update is kept as
//! `raw` and never modified.

use serde::Deserialize;
use serde_json::Value;

use crate::error::DecodeError;

/// Telegram chat type. Plain (non-super) groups land in `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatKind {
    Channel,
    Supergroup,
    Private,
    #[serde(other)]
    Other,
}

impl std::fmt::Display for ChatKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChatKind::Channel => write!(f, "channel"),
            ChatKind::Supergroup => write!(f, "supergroup"),
            ChatKind::Private => write!(f, "private"),
            ChatKind::Other => write!(f, "other"),
        }
    }
}

/// The parts of a message the relay looks at.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageRef {
    pub chat_id: i64,
    pub chat_kind: ChatKind,
    pub message_id: i32,
    /// Forum topic the message was posted in, if any.
    pub thread_id: Option<i32>,
    pub text: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    ChannelPost(MessageRef),
    GroupMessage(MessageRef),
    OtherUpdate,
}

impl EventKind {
    pub fn label(&self) -> &'static str {
        match self {
            EventKind::ChannelPost(_) => "channel_post",
            EventKind::GroupMessage(_) => "message",
            EventKind::OtherUpdate => "other",
        }
    }
}

#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub update_id: i64,
    pub kind: EventKind,
    pub raw: Value,
}

impl InboundEvent {
    /// Decode one update as delivered by `getUpdates` or a webhook call.
    pub fn decode(raw: Value) -> Result<Self, DecodeError> {
        let wire: WireUpdate = serde_json::from_value(raw.clone())?;

        let kind = match (wire.channel_post, wire.message) {
            (Some(post), _) => EventKind::ChannelPost(post.into()),
            (None, Some(msg)) => EventKind::GroupMessage(msg.into()),
            (None, None) => EventKind::OtherUpdate,
        };

        Ok(Self {
            update_id: wire.update_id,
            kind,
            raw,
        })
    }

    pub fn message(&self) -> Option<&MessageRef> {
        match &self.kind {
            EventKind::ChannelPost(m) | EventKind::GroupMessage(m) => Some(m),
            EventKind::OtherUpdate => None,
        }
    }
}

/// Best-effort read of `update_id` from a payload that failed to decode.
pub fn peek_update_id(raw: &Value) -> Option<i64> {
    raw.get("update_id").and_then(Value::as_i64)
}

#[derive(Deserialize)]
struct WireUpdate {
    update_id: i64,
    #[serde(default)]
    message: Option<WireMessage>,
    #[serde(default)]
    channel_post: Option<WireMessage>,
}

#[derive(Deserialize)]
struct WireMessage {
    message_id: i32,
    chat: WireChat,
    #[serde(default)]
    message_thread_id: Option<i32>,
    #[serde(default)]
    is_topic_message: bool,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct WireChat {
    id: i64,
    #[serde(rename = "type")]
    kind: ChatKind,
}

impl From<WireMessage> for MessageRef {
    fn from(msg: WireMessage) -> Self {
        // message_thread_id is also set on plain reply threads; only topics count
        let thread_id = if msg.is_topic_message {
            msg.message_thread_id
        } else {
            None
        };
        Self {
            chat_id: msg.chat.id,
            chat_kind: msg.chat.kind,
            message_id: msg.message_id,
            thread_id,
            text: msg.text,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_channel_post() {
        let event = InboundEvent::decode(channel_post(5, -1001, 7)).unwrap();
        assert_eq!(event.update_id, 5);
        let msg = match &event.kind {
            EventKind::ChannelPost(m) => m,
            other => panic!("expected channel post, got {:?}", other),
        };
        assert_eq!(msg.chat_id, -1001);
        assert_eq!(msg.chat_kind, ChatKind::Channel);
        assert_eq!(msg.message_id, 7);
        assert_eq!(msg.text.as_deref(), Some("hello"));
    }

    #[test]
    fn test_decode_group_message() {
        let event = InboundEvent::decode(group_message(9, -3003, 1)).unwrap();
        assert!(matches!(event.kind, EventKind::GroupMessage(_)));
        assert_eq!(event.message().unwrap().chat_kind, ChatKind::Supergroup);
    }

    #[test]
    fn test_plain_group_is_other_kind() {
        let event = InboundEvent::decode(text_message(1, -5, "group", "x")).unwrap();
        assert_eq!(event.message().unwrap().chat_kind, ChatKind::Other);
    }

    #[test]
    fn test_unknown_update_is_other() {
        let raw = json!({ "update_id": 3, "callback_query": { "id": "abc" } });
        let event = InboundEvent::decode(raw.clone()).unwrap();
        assert_eq!(event.kind, EventKind::OtherUpdate);
        assert_eq!(event.raw, raw);
    }

    #[test]
    fn test_topic_thread_only_for_topic_messages() {
        let mut raw = group_message(1, -3003, 4);
        raw["message"]["message_thread_id"] = json!(55);
        let event = InboundEvent::decode(raw.clone()).unwrap();
        assert_eq!(event.message().unwrap().thread_id, None);

        raw["message"]["is_topic_message"] = json!(true);
        let event = InboundEvent::decode(raw).unwrap();
        assert_eq!(event.message().unwrap().thread_id, Some(55));
    }

    #[test]
    fn test_malformed_update_fails_but_id_is_peekable() {
        let raw = json!({ "update_id": 12, "channel_post": { "message_id": "seven" } });
        assert!(InboundEvent::decode(raw.clone()).is_err());
        assert_eq!(peek_update_id(&raw), Some(12));
        assert_eq!(peek_update_id(&json!("garbage")), None);
    }
}
