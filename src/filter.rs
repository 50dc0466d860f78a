use std::collections::BTreeMap;

use crate::event::{ChatKind, InboundEvent};

/// Chats whose messages get relayed. Fixed at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceSet {
    members: BTreeMap<i64, ChatKind>,
}

impl SourceSet {
    pub fn new(channel_id: i64) -> Self {
        let mut members = BTreeMap::new();
        members.insert(channel_id, ChatKind::Channel);
        Self { members }
    }

    pub fn with_group(mut self, group_id: i64) -> Self {
        self.members.entry(group_id).or_insert(ChatKind::Supergroup);
        self
    }

    pub fn contains(&self, chat_id: i64) -> bool {
        self.members.contains_key(&chat_id)
    }

    pub fn chat_ids(&self) -> impl Iterator<Item = i64> + '_ {
        self.members.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (i64, ChatKind)> + '_ {
        self.members.iter().map(|(id, kind)| (*id, *kind))
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }
}

/// A message accepted for relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayRequest {
    pub source_chat_id: i64,
    pub message_id: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Update carries no message (edits, callbacks, member changes, ...).
    NotAMessage,
    UnsupportedChatKind(ChatKind),
    UnknownSource(i64),
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::NotAMessage => write!(f, "not a message"),
            RejectReason::UnsupportedChatKind(kind) => write!(f, "unsupported chat kind {}", kind),
            RejectReason::UnknownSource(id) => write!(f, "chat {} is not a source", id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterDecision {
    Accept(RelayRequest),
    Reject(RejectReason),
}

/// Accept iff the event is a channel or supergroup message from a source chat.
pub fn classify(event: &InboundEvent, sources: &SourceSet) -> FilterDecision {
    let Some(msg) = event.message() else {
        return FilterDecision::Reject(RejectReason::NotAMessage);
    };

    if !matches!(msg.chat_kind, ChatKind::Channel | ChatKind::Supergroup) {
        return FilterDecision::Reject(RejectReason::UnsupportedChatKind(msg.chat_kind));
    }

    if !sources.contains(msg.chat_id) {
        return FilterDecision::Reject(RejectReason::UnknownSource(msg.chat_id));
    }

    FilterDecision::Accept(RelayRequest {
        source_chat_id: msg.chat_id,
        message_id: msg.message_id,
    })
}
