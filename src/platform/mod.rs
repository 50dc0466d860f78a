pub mod telegram;

use async_trait::async_trait;
use serde_json::Value;
use url::Url;

use crate::error::ApiError;
use crate::relay::RelayTarget;

/// The slice of the Telegram Bot API the relay depends on.
///
/// Message ids returned are ids of the newly created destination message.
/// Updates are returned as raw JSON so decoding failures stay per-update.
#[async_trait]
pub trait TelegramApi: Send + Sync {
    async fn forward(
        &self,
        target: RelayTarget,
        from_chat_id: i64,
        message_id: i32,
    ) -> Result<i32, ApiError>;

    async fn copy(
        &self,
        target: RelayTarget,
        from_chat_id: i64,
        message_id: i32,
    ) -> Result<i32, ApiError>;

    async fn send_text(
        &self,
        chat_id: i64,
        thread_id: Option<i32>,
        reply_to: Option<i32>,
        text: &str,
    ) -> Result<i32, ApiError>;

    async fn set_webhook(
        &self,
        url: &Url,
        secret_token: Option<&str>,
        drop_pending_updates: bool,
    ) -> Result<(), ApiError>;

    async fn delete_webhook(&self, drop_pending_updates: bool) -> Result<(), ApiError>;

    /// Long-poll for updates with `update_id >= offset`.
    async fn get_updates(&self, offset: Option<i64>, timeout_secs: u32)
        -> Result<Vec<Value>, ApiError>;

    /// Username of the bot behind the credential.
    async fn get_me(&self) -> Result<String, ApiError>;
}

#[cfg(test)]
pub(crate) mod mock {
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use tokio_util::sync::CancellationToken;

    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    pub enum Call {
        Forward {
            to_chat: i64,
            to_topic: Option<i32>,
            from_chat: i64,
            message_id: i32,
        },
        Copy {
            to_chat: i64,
            to_topic: Option<i32>,
            from_chat: i64,
            message_id: i32,
        },
        SendText {
            chat_id: i64,
            thread_id: Option<i32>,
            reply_to: Option<i32>,
            text: String,
        },
        SetWebhook {
            url: String,
            secret_token: Option<String>,
            drop_pending_updates: bool,
        },
        DeleteWebhook {
            drop_pending_updates: bool,
        },
        GetUpdates {
            offset: Option<i64>,
            timeout_secs: u32,
        },
        GetMe,
    }

    impl Call {
        pub fn is_relay(&self) -> bool {
            matches!(self, Call::Forward { .. } | Call::Copy { .. })
        }
    }

    /// Records every call. Destination message ids count up from 99.
    pub struct MockApi {
        calls: Mutex<Vec<Call>>,
        failures: Mutex<HashMap<i32, ApiError>>,
        batches: Mutex<VecDeque<Result<Vec<Value>, ApiError>>>,
        on_drained: Mutex<Option<CancellationToken>>,
        next_id: AtomicI32,
        relay_delay: Mutex<Option<Duration>>,
    }

    impl MockApi {
        pub fn new() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                failures: Mutex::new(HashMap::new()),
                batches: Mutex::new(VecDeque::new()),
                on_drained: Mutex::new(None),
                next_id: AtomicI32::new(99),
                relay_delay: Mutex::new(None),
            }
        }

        /// Relaying `message_id` fails with `err`.
        pub fn fail_message(&self, message_id: i32, err: ApiError) {
            self.failures.lock().unwrap().insert(message_id, err);
        }

        pub fn push_batch(&self, updates: Vec<Value>) {
            self.batches.lock().unwrap().push_back(Ok(updates));
        }

        pub fn push_fetch_error(&self, err: ApiError) {
            self.batches.lock().unwrap().push_back(Err(err));
        }

        /// Cancel `token` once every scripted batch has been fetched.
        pub fn cancel_when_drained(&self, token: CancellationToken) {
            *self.on_drained.lock().unwrap() = Some(token);
        }

        pub fn delay_relays(&self, delay: Duration) {
            *self.relay_delay.lock().unwrap() = Some(delay);
        }

        pub fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        pub fn relay_calls(&self) -> Vec<Call> {
            self.calls().into_iter().filter(Call::is_relay).collect()
        }

        fn record(&self, call: Call) {
            self.calls.lock().unwrap().push(call);
        }

        async fn relay(&self, call: Call, message_id: i32) -> Result<i32, ApiError> {
            self.record(call);
            let delay = *self.relay_delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(err) = self.failures.lock().unwrap().get(&message_id) {
                return Err(err.clone());
            }
            Ok(self.next_id.fetch_add(1, Ordering::SeqCst))
        }
    }

    #[async_trait]
    impl TelegramApi for MockApi {
        async fn forward(
            &self,
            target: RelayTarget,
            from_chat_id: i64,
            message_id: i32,
        ) -> Result<i32, ApiError> {
            let call = Call::Forward {
                to_chat: target.chat_id,
                to_topic: target.topic_id,
                from_chat: from_chat_id,
                message_id,
            };
            self.relay(call, message_id).await
        }

        async fn copy(
            &self,
            target: RelayTarget,
            from_chat_id: i64,
            message_id: i32,
        ) -> Result<i32, ApiError> {
            let call = Call::Copy {
                to_chat: target.chat_id,
                to_topic: target.topic_id,
                from_chat: from_chat_id,
                message_id,
            };
            self.relay(call, message_id).await
        }

        async fn send_text(
            &self,
            chat_id: i64,
            thread_id: Option<i32>,
            reply_to: Option<i32>,
            text: &str,
        ) -> Result<i32, ApiError> {
            self.record(Call::SendText {
                chat_id,
                thread_id,
                reply_to,
                text: text.to_string(),
            });
            Ok(self.next_id.fetch_add(1, Ordering::SeqCst))
        }

        async fn set_webhook(
            &self,
            url: &Url,
            secret_token: Option<&str>,
            drop_pending_updates: bool,
        ) -> Result<(), ApiError> {
            self.record(Call::SetWebhook {
                url: url.to_string(),
                secret_token: secret_token.map(str::to_string),
                drop_pending_updates,
            });
            Ok(())
        }

        async fn delete_webhook(&self, drop_pending_updates: bool) -> Result<(), ApiError> {
            self.record(Call::DeleteWebhook {
                drop_pending_updates,
            });
            Ok(())
        }

        async fn get_updates(
            &self,
            offset: Option<i64>,
            timeout_secs: u32,
        ) -> Result<Vec<Value>, ApiError> {
            self.record(Call::GetUpdates {
                offset,
                timeout_secs,
            });
            let next = self.batches.lock().unwrap().pop_front();
            match next {
                Some(batch) => batch,
                None => {
                    let token = self.on_drained.lock().unwrap().clone();
                    match token {
                        Some(token) => {
                            token.cancel();
                            Ok(Vec::new())
                        }
                        None => std::future::pending().await,
                    }
                }
            }
        }

        async fn get_me(&self) -> Result<String, ApiError> {
            self.record(Call::GetMe);
            Ok("relay_test_bot".to_string())
        }
    }
}
