//! Structured log records for every pipeline stage, plus the liveness check.

use tracing::{debug, error, info, trace, warn, Level};

use crate::error::{ApiError, DecodeError};
use crate::event::{InboundEvent, MessageRef};
use crate::filter::{FilterDecision, RelayRequest};
use crate::platform::TelegramApi;
use crate::relay::RelayOutcome;

pub const LIVENESS_REPLY: &str = "pong";

/// Process lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Starting,
    ValidatingConfig,
    Running,
    ShuttingDown,
    Stopped,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::Starting => "starting",
            Phase::ValidatingConfig => "validating-config",
            Phase::Running => "running",
            Phase::ShuttingDown => "shutting-down",
            Phase::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

pub fn enter(phase: Phase) {
    info!(phase = %phase, "Lifecycle phase");
}

/// Events that will be relayed are logged at info, everything else at debug.
pub fn inbound_level(decision: &FilterDecision) -> Level {
    match decision {
        FilterDecision::Accept(_) => Level::INFO,
        FilterDecision::Reject(_) => Level::DEBUG,
    }
}

pub fn inbound(event: &InboundEvent, decision: &FilterDecision) {
    trace!(update_id = event.update_id, payload = %event.raw, "Raw update");
    let chat_id = event.message().map(|msg| msg.chat_id);
    let chat_kind = event.message().map(|msg| msg.chat_kind.to_string());
    let message_id = event.message().map(|msg| msg.message_id);

    if inbound_level(decision) == Level::INFO {
        info!(
            update_id = event.update_id,
            kind = event.kind.label(),
            chat_id = ?chat_id,
            chat_kind = ?chat_kind,
            message_id = ?message_id,
            "Inbound event"
        );
    } else {
        debug!(
            update_id = event.update_id,
            kind = event.kind.label(),
            chat_id = ?chat_id,
            chat_kind = ?chat_kind,
            message_id = ?message_id,
            "Inbound event"
        );
    }
}

pub fn decode_failed(update_id: Option<i64>, err: &DecodeError) {
    warn!(update_id = ?update_id, error = %err, "Skipping undecodable update");
}

pub fn decision(event: &InboundEvent, decision: &FilterDecision) {
    match decision {
        FilterDecision::Accept(req) => info!(
            update_id = event.update_id,
            chat_id = req.source_chat_id,
            message_id = req.message_id,
            "Accepted for relay"
        ),
        FilterDecision::Reject(reason) => debug!(
            update_id = event.update_id,
            reason = %reason,
            "Rejected"
        ),
    }
}

pub fn outcome(req: &RelayRequest, outcome: &RelayOutcome) {
    match outcome {
        RelayOutcome::Success(dest_id) => info!(
            chat_id = req.source_chat_id,
            message_id = req.message_id,
            dest_message_id = dest_id,
            "Relay succeeded"
        ),
        RelayOutcome::Failure(err) => error!(
            chat_id = req.source_chat_id,
            message_id = req.message_id,
            error = %err,
            "Relay failed"
        ),
    }
}

/// Replies to a fixed command. Only consulted for events the filter rejects,
/// so posts in source chats are always relayed.
#[derive(Debug, Clone)]
pub struct LivenessCheck {
    command: String,
}

impl LivenessCheck {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    /// The liveness command, if `event` is one. Accepts `/ping@somebot` too.
    pub fn matches<'a>(&self, event: &'a InboundEvent) -> Option<&'a MessageRef> {
        let msg = event.message()?;
        let first = msg.text.as_deref()?.split_whitespace().next()?;
        let command = first.split('@').next().unwrap_or(first);
        (command == self.command).then_some(msg)
    }

    pub async fn answer(&self, api: &dyn TelegramApi, msg: &MessageRef) -> Result<i32, ApiError> {
        let sent = api
            .send_text(msg.chat_id, msg.thread_id, Some(msg.message_id), LIVENESS_REPLY)
            .await;
        match &sent {
            Ok(_) => info!(chat_id = msg.chat_id, "Answered liveness check"),
            Err(e) => warn!(chat_id = msg.chat_id, error = %e, "Liveness reply failed"),
        }
        sent
    }
}
