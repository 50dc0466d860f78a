use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::Mutex;

use crate::error::DispatchError;
use crate::filter::{RelayRequest, SourceSet};
use crate::platform::TelegramApi;

/// Where relayed messages land.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayTarget {
    pub chat_id: i64,
    /// Forum topic inside `chat_id`; `None` posts to the general stream.
    pub topic_id: Option<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayMode {
    /// Keeps the "Forwarded from" header.
    #[default]
    Forward,
    /// Same content, no attribution.
    Copy,
}

impl FromStr for RelayMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "forward" => Ok(RelayMode::Forward),
            "copy" => Ok(RelayMode::Copy),
            other => Err(format!("expected forward or copy, got {}", other)),
        }
    }
}

impl std::fmt::Display for RelayMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RelayMode::Forward => write!(f, "forward"),
            RelayMode::Copy => write!(f, "copy"),
        }
    }
}

/// How concurrent webhook deliveries are relayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchOrdering {
    /// No ordering between in-flight relays.
    #[default]
    Concurrent,
    /// One relay at a time per source chat.
    PerChat,
}

impl FromStr for DispatchOrdering {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "concurrent" => Ok(DispatchOrdering::Concurrent),
            "per_chat" | "per-chat" => Ok(DispatchOrdering::PerChat),
            other => Err(format!("expected concurrent or per_chat, got {}", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub enum RelayOutcome {
    /// Id of the message created in the destination chat.
    Success(i32),
    Failure(DispatchError),
}

/// Issues exactly one downstream call per accepted message. Never retries.
pub struct Dispatcher {
    api: Arc<dyn TelegramApi>,
    target: RelayTarget,
    mode: RelayMode,
    timeout: Duration,
    chat_locks: Option<HashMap<i64, Mutex<()>>>,
}

impl Dispatcher {
    pub fn new(
        api: Arc<dyn TelegramApi>,
        target: RelayTarget,
        mode: RelayMode,
        timeout: Duration,
    ) -> Self {
        Self {
            api,
            target,
            mode,
            timeout,
            chat_locks: None,
        }
    }

    /// The source set is fixed, so the lock table is built once and never grows.
    pub fn with_ordering(mut self, ordering: DispatchOrdering, sources: &SourceSet) -> Self {
        self.chat_locks = match ordering {
            DispatchOrdering::Concurrent => None,
            DispatchOrdering::PerChat => Some(
                sources
                    .chat_ids()
                    .map(|id| (id, Mutex::new(())))
                    .collect(),
            ),
        };
        self
    }

    pub async fn dispatch(&self, req: RelayRequest) -> RelayOutcome {
        if req.source_chat_id == 0 || req.message_id <= 0 {
            return RelayOutcome::Failure(DispatchError::MalformedSource {
                chat_id: req.source_chat_id,
                message_id: req.message_id,
            });
        }

        // The wait for the chat lock counts against the same deadline as the call.
        let call = async {
            let _guard = match self
                .chat_locks
                .as_ref()
                .and_then(|locks| locks.get(&req.source_chat_id))
            {
                Some(lock) => Some(lock.lock().await),
                None => None,
            };

            match self.mode {
                RelayMode::Forward => {
                    self.api
                        .forward(self.target, req.source_chat_id, req.message_id)
                        .await
                }
                RelayMode::Copy => {
                    self.api
                        .copy(self.target, req.source_chat_id, req.message_id)
                        .await
                }
            }
        };

        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(dest_id)) => RelayOutcome::Success(dest_id),
            Ok(Err(e)) => RelayOutcome::Failure(e.into()),
            Err(_) => RelayOutcome::Failure(DispatchError::TimedOut(self.timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiError;
    use crate::platform::mock::{Call, MockApi};

    fn request(chat: i64, message: i32) -> RelayRequest {
        RelayRequest {
            source_chat_id: chat,
            message_id: message,
        }
    }

    fn dispatcher(api: Arc<MockApi>, topic: Option<i32>, mode: RelayMode) -> Dispatcher {
        Dispatcher::new(
            api,
            RelayTarget {
                chat_id: 2002,
                topic_id: topic,
            },
            mode,
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn test_copy_without_topic() {
        let api = Arc::new(MockApi::new());
        let d = dispatcher(api.clone(), None, RelayMode::Copy);

        let outcome = d.dispatch(request(1001, 7)).await;

        assert!(matches!(outcome, RelayOutcome::Success(99)));
        assert_eq!(
            api.calls(),
            vec![Call::Copy {
                to_chat: 2002,
                to_topic: None,
                from_chat: 1001,
                message_id: 7
            }]
        );
    }

    #[tokio::test]
    async fn test_forward_into_topic() {
        let api = Arc::new(MockApi::new());
        let d = dispatcher(api.clone(), Some(55), RelayMode::Forward);

        d.dispatch(request(1001, 8)).await;

        assert_eq!(
            api.calls(),
            vec![Call::Forward {
                to_chat: 2002,
                to_topic: Some(55),
                from_chat: 1001,
                message_id: 8
            }]
        );
    }

    #[tokio::test]
    async fn test_rejection_is_reported_not_retried() {
        let api = Arc::new(MockApi::new());
        api.fail_message(42, ApiError::Rejected("message can't be forwarded".into()));
        let d = dispatcher(api.clone(), None, RelayMode::Forward);

        let outcome = d.dispatch(request(1001, 42)).await;

        assert!(matches!(
            outcome,
            RelayOutcome::Failure(DispatchError::Rejected(_))
        ));
        assert_eq!(api.relay_calls().len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_reference_skips_downstream() {
        let api = Arc::new(MockApi::new());
        let d = dispatcher(api.clone(), None, RelayMode::Copy);

        let outcome = d.dispatch(request(1001, 0)).await;

        assert!(matches!(
            outcome,
            RelayOutcome::Failure(DispatchError::MalformedSource { message_id: 0, .. })
        ));
        assert!(api.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_downstream_times_out() {
        let api = Arc::new(MockApi::new());
        api.delay_relays(Duration::from_secs(60));
        let d = dispatcher(api.clone(), None, RelayMode::Copy);

        let outcome = d.dispatch(request(1001, 3)).await;

        assert!(matches!(
            outcome,
            RelayOutcome::Failure(DispatchError::TimedOut(t)) if t == Duration::from_secs(5)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_chat_ordering_serializes_same_chat() {
        let api = Arc::new(MockApi::new());
        api.delay_relays(Duration::from_secs(1));
        let sources = SourceSet::new(1001);
        let d = dispatcher(api.clone(), None, RelayMode::Copy)
            .with_ordering(DispatchOrdering::PerChat, &sources);

        let start = tokio::time::Instant::now();
        let (a, b) = tokio::join!(d.dispatch(request(1001, 1)), d.dispatch(request(1001, 2)));

        assert!(matches!(a, RelayOutcome::Success(_)));
        assert!(matches!(b, RelayOutcome::Success(_)));
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_queued_same_chat_dispatches_share_one_deadline() {
        let api = Arc::new(MockApi::new());
        api.delay_relays(Duration::from_secs(60));
        let sources = SourceSet::new(1001);
        let d = dispatcher(api.clone(), None, RelayMode::Copy)
            .with_ordering(DispatchOrdering::PerChat, &sources);

        let start = tokio::time::Instant::now();
        let (a, b, c, e) = tokio::join!(
            d.dispatch(request(1001, 1)),
            d.dispatch(request(1001, 2)),
            d.dispatch(request(1001, 3)),
            d.dispatch(request(1001, 4)),
        );

        for outcome in [a, b, c, e] {
            assert!(matches!(
                outcome,
                RelayOutcome::Failure(DispatchError::TimedOut(_))
            ));
        }
        // Every dispatch is abandoned at its own 5s deadline, not after its queue position.
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_ordering_overlaps() {
        let api = Arc::new(MockApi::new());
        api.delay_relays(Duration::from_secs(1));
        let sources = SourceSet::new(1001);
        let d = dispatcher(api.clone(), None, RelayMode::Copy)
            .with_ordering(DispatchOrdering::Concurrent, &sources);

        let start = tokio::time::Instant::now();
        tokio::join!(d.dispatch(request(1001, 1)), d.dispatch(request(1001, 2)));

        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_mode_and_ordering_parse() {
        assert_eq!("Copy".parse::<RelayMode>(), Ok(RelayMode::Copy));
        assert!("mirror".parse::<RelayMode>().is_err());
        assert_eq!(
            "per_chat".parse::<DispatchOrdering>(),
            Ok(DispatchOrdering::PerChat)
        );
    }
}
