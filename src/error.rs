use std::time::Duration;

use thiserror::Error;

/// Startup configuration problems. Always fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

/// An inbound update that could not be turned into an event.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failure talking to the Telegram Bot API.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// The request never got an answer (DNS, TLS, connection reset, ...).
    #[error("telegram unreachable: {0}")]
    Unreachable(String),

    /// Telegram answered and refused the request.
    #[error("telegram rejected request: {0}")]
    Rejected(String),
}

/// A relay attempt that did not produce a destination message.
#[derive(Debug, Clone, Error)]
pub enum DispatchError {
    #[error("downstream unreachable: {0}")]
    Unreachable(String),

    #[error("downstream rejected relay: {0}")]
    Rejected(String),

    #[error("malformed source reference chat={chat_id} message={message_id}")]
    MalformedSource { chat_id: i64, message_id: i32 },

    #[error("downstream call timed out after {0:?}")]
    TimedOut(Duration),
}

impl From<ApiError> for DispatchError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Unreachable(detail) => DispatchError::Unreachable(detail),
            ApiError::Rejected(detail) => DispatchError::Rejected(detail),
        }
    }
}
