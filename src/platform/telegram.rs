use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use teloxide::payloads::setters::*;
use teloxide::prelude::*;
use teloxide::types::{AllowedUpdate, MessageId, ReplyParameters, ThreadId};
use teloxide::RequestError;
use url::Url;

use super::TelegramApi;
use crate::error::ApiError;
use crate::relay::RelayTarget;

const API_BASE: &str = "https://api.telegram.org";

/// Update kinds the relay asks Telegram for.
fn allowed_updates() -> Vec<AllowedUpdate> {
    vec![AllowedUpdate::Message, AllowedUpdate::ChannelPost]
}

fn api_error(err: RequestError) -> ApiError {
    match err {
        RequestError::Network(e) => ApiError::Unreachable(e.to_string()),
        RequestError::Io(e) => ApiError::Unreachable(e.to_string()),
        other => ApiError::Rejected(other.to_string()),
    }
}

fn transport_error(err: reqwest::Error) -> ApiError {
    ApiError::Unreachable(err.to_string())
}

#[derive(Serialize)]
struct GetUpdatesRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    offset: Option<i64>,
    timeout: u32,
    allowed_updates: Vec<AllowedUpdate>,
}

#[derive(Deserialize)]
struct UpdatesEnvelope {
    ok: bool,
    #[serde(default)]
    result: Option<Vec<Value>>,
    #[serde(default)]
    description: Option<String>,
}

/// Unwraps a `getUpdates` response body. Each update is returned exactly as
/// the platform sent it.
fn parse_updates(status: reqwest::StatusCode, body: &[u8]) -> Result<Vec<Value>, ApiError> {
    let envelope: UpdatesEnvelope = serde_json::from_slice(body).map_err(|e| {
        ApiError::Rejected(format!("unreadable getUpdates response ({}): {}", status, e))
    })?;

    match envelope {
        UpdatesEnvelope {
            ok: true,
            result: Some(updates),
            ..
        } => Ok(updates),
        UpdatesEnvelope { ok: true, .. } => Ok(Vec::new()),
        UpdatesEnvelope { description, .. } => Err(ApiError::Rejected(
            description.unwrap_or_else(|| format!("getUpdates failed with {}", status)),
        )),
    }
}

/// Bot API client backed by teloxide.
///
/// `getUpdates` goes over the same HTTP client as raw JSON, so updates reach
/// the pipeline without passing through teloxide's typed models.
pub struct TeloxideApi {
    bot: Bot,
    client: reqwest::Client,
    updates_url: String,
}

impl TeloxideApi {
    /// `http_timeout` must exceed the long-poll timeout or every idle poll
    /// turns into a client-side timeout.
    pub fn new(token: &str, http_timeout: Duration, force_ipv4: bool) -> Result<Self> {
        let mut builder = teloxide::net::default_reqwest_settings().timeout(http_timeout);
        if force_ipv4 {
            builder = builder.local_address(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        }
        let client = builder.build().context("Failed to build HTTP client")?;

        Ok(Self {
            bot: Bot::with_client(token, client.clone()),
            client,
            updates_url: format!("{}/bot{}/getUpdates", API_BASE, token),
        })
    }
}

#[async_trait]
impl TelegramApi for TeloxideApi {
    async fn forward(
        &self,
        target: RelayTarget,
        from_chat_id: i64,
        message_id: i32,
    ) -> Result<i32, ApiError> {
        let mut req = self.bot.forward_message(
            ChatId(target.chat_id),
            ChatId(from_chat_id),
            MessageId(message_id),
        );
        if let Some(topic) = target.topic_id {
            req = req.message_thread_id(ThreadId(MessageId(topic)));
        }
        let msg = req.await.map_err(api_error)?;
        Ok(msg.id.0)
    }

    async fn copy(
        &self,
        target: RelayTarget,
        from_chat_id: i64,
        message_id: i32,
    ) -> Result<i32, ApiError> {
        let mut req = self.bot.copy_message(
            ChatId(target.chat_id),
            ChatId(from_chat_id),
            MessageId(message_id),
        );
        if let Some(topic) = target.topic_id {
            req = req.message_thread_id(ThreadId(MessageId(topic)));
        }
        let id = req.await.map_err(api_error)?;
        Ok(id.0)
    }

    async fn send_text(
        &self,
        chat_id: i64,
        thread_id: Option<i32>,
        reply_to: Option<i32>,
        text: &str,
    ) -> Result<i32, ApiError> {
        let mut req = self.bot.send_message(ChatId(chat_id), text);
        if let Some(thread) = thread_id {
            req = req.message_thread_id(ThreadId(MessageId(thread)));
        }
        if let Some(reply) = reply_to {
            req = req.reply_parameters(ReplyParameters::new(MessageId(reply)));
        }
        let msg = req.await.map_err(api_error)?;
        Ok(msg.id.0)
    }

    async fn set_webhook(
        &self,
        url: &Url,
        secret_token: Option<&str>,
        drop_pending_updates: bool,
    ) -> Result<(), ApiError> {
        let mut req = self
            .bot
            .set_webhook(url.clone())
            .drop_pending_updates(drop_pending_updates)
            .allowed_updates(allowed_updates());
        if let Some(secret) = secret_token {
            req = req.secret_token(secret.to_string());
        }
        req.await.map_err(api_error)?;
        Ok(())
    }

    async fn delete_webhook(&self, drop_pending_updates: bool) -> Result<(), ApiError> {
        self.bot
            .delete_webhook()
            .drop_pending_updates(drop_pending_updates)
            .await
            .map_err(api_error)?;
        Ok(())
    }

    async fn get_updates(
        &self,
        offset: Option<i64>,
        timeout_secs: u32,
    ) -> Result<Vec<Value>, ApiError> {
        let request = GetUpdatesRequest {
            offset,
            timeout: timeout_secs,
            allowed_updates: allowed_updates(),
        };

        let response = self
            .client
            .post(&self.updates_url)
            .json(&request)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let body = response.bytes().await.map_err(transport_error)?;
        parse_updates(status, &body)
    }

    async fn get_me(&self) -> Result<String, ApiError> {
        let me = self.bot.get_me().await.map_err(api_error)?;
        Ok(me
            .user
            .username
            .clone()
            .unwrap_or_else(|| me.user.first_name.clone()))
    }
}
