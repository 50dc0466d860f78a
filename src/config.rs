use std::fmt::Display;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::error::ConfigError;
use crate::filter::SourceSet;
use crate::relay::{DispatchOrdering, RelayMode, RelayTarget};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    #[default]
    Polling,
    Webhook,
}

impl FromStr for DeliveryMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "polling" | "poll" => Ok(DeliveryMode::Polling),
            "webhook" => Ok(DeliveryMode::Webhook),
            other => Err(format!("expected polling or webhook, got {}", other)),
        }
    }
}

/// Bot credential. Never printed.
#[derive(Clone, PartialEq)]
pub struct BotToken(String);

impl BotToken {
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for BotToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BotToken(***)")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WebhookConfig {
    /// Full public URL registered with Telegram.
    pub url: Url,
    /// Route the listener serves, e.g. `/webhook`.
    pub route: String,
    pub port: u16,
    pub secret_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Polling { timeout_secs: u32 },
    Webhook(WebhookConfig),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bot_token: BotToken,
    pub target: RelayTarget,
    pub sources: SourceSet,
    pub relay_mode: RelayMode,
    pub ordering: DispatchOrdering,
    pub delivery: Delivery,
    pub drop_pending_updates: bool,
    pub request_timeout: Duration,
    pub shutdown_grace: Duration,
    pub ping_command: String,
    pub force_ipv4: bool,
}

/// Every setting as read, before validation. TOML keys are the lowercase
/// environment variable names.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    bot_token: Option<String>,
    target_group_id: Option<i64>,
    target_topic_id: Option<i32>,
    source_channel_id: Option<i64>,
    source_group_id: Option<i64>,
    relay_mode: Option<RelayMode>,
    delivery_mode: Option<DeliveryMode>,
    webhook_host: Option<String>,
    webhook_path: Option<String>,
    webhook_secret: Option<String>,
    port: Option<u16>,
    drop_pending_updates: Option<bool>,
    poll_timeout_secs: Option<u32>,
    request_timeout_secs: Option<u64>,
    shutdown_grace_secs: Option<u64>,
    ping_command: Option<String>,
    dispatch_ordering: Option<DispatchOrdering>,
    force_ipv4: Option<bool>,
}

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_WEBHOOK_PATH: &str = "webhook";
const DEFAULT_POLL_TIMEOUT_SECS: u32 = 30;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 5;
const DEFAULT_PING_COMMAND: &str = "/ping";

fn invalid(key: &'static str, value: impl Into<String>, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.into(),
        reason: reason.into(),
    }
}

fn parse_value<T>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    value
        .trim()
        .parse::<T>()
        .map_err(|e| invalid(key, value, e.to_string()))
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(key, value, "expected a boolean")),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl RawConfig {
    fn from_toml_str(content: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Environment values replace file values. Empty variables are ignored.
    fn overlay<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| non_empty(lookup(key));

        if let Some(v) = get("BOT_TOKEN") {
            self.bot_token = Some(v.trim().to_string());
        }
        if let Some(v) = get("TARGET_GROUP_ID") {
            self.target_group_id = Some(parse_value("TARGET_GROUP_ID", &v)?);
        }
        if let Some(v) = get("TARGET_TOPIC_ID") {
            self.target_topic_id = Some(parse_value("TARGET_TOPIC_ID", &v)?);
        }
        if let Some(v) = get("SOURCE_CHANNEL_ID") {
            self.source_channel_id = Some(parse_value("SOURCE_CHANNEL_ID", &v)?);
        }
        if let Some(v) = get("SOURCE_GROUP_ID") {
            self.source_group_id = Some(parse_value("SOURCE_GROUP_ID", &v)?);
        }
        if let Some(v) = get("RELAY_MODE") {
            self.relay_mode = Some(parse_value("RELAY_MODE", &v)?);
        }
        if let Some(v) = get("DELIVERY_MODE") {
            self.delivery_mode = Some(parse_value("DELIVERY_MODE", &v)?);
        }
        if let Some(v) = get("WEBHOOK_HOST") {
            self.webhook_host = Some(v);
        }
        if let Some(v) = get("WEBHOOK_PATH") {
            self.webhook_path = Some(v);
        }
        if let Some(v) = get("WEBHOOK_SECRET") {
            self.webhook_secret = Some(v);
        }
        if let Some(v) = get("PORT") {
            self.port = Some(parse_value("PORT", &v)?);
        }
        if let Some(v) = get("DROP_PENDING_UPDATES") {
            self.drop_pending_updates = Some(parse_bool("DROP_PENDING_UPDATES", &v)?);
        }
        if let Some(v) = get("POLL_TIMEOUT_SECS") {
            self.poll_timeout_secs = Some(parse_value("POLL_TIMEOUT_SECS", &v)?);
        }
        if let Some(v) = get("REQUEST_TIMEOUT_SECS") {
            self.request_timeout_secs = Some(parse_value("REQUEST_TIMEOUT_SECS", &v)?);
        }
        if let Some(v) = get("SHUTDOWN_GRACE_SECS") {
            self.shutdown_grace_secs = Some(parse_value("SHUTDOWN_GRACE_SECS", &v)?);
        }
        if let Some(v) = get("PING_COMMAND") {
            self.ping_command = Some(v.trim().to_string());
        }
        if let Some(v) = get("DISPATCH_ORDERING") {
            self.dispatch_ordering = Some(parse_value("DISPATCH_ORDERING", &v)?);
        }
        if let Some(v) = get("FORCE_IPV4") {
            self.force_ipv4 = Some(parse_bool("FORCE_IPV4", &v)?);
        }
        Ok(())
    }

    fn validate(self) -> Result<Config, ConfigError> {
        let bot_token = non_empty(self.bot_token).ok_or(ConfigError::Missing("BOT_TOKEN"))?;
        let target_chat = self
            .target_group_id
            .ok_or(ConfigError::Missing("TARGET_GROUP_ID"))?;
        let source_channel = self
            .source_channel_id
            .ok_or(ConfigError::Missing("SOURCE_CHANNEL_ID"))?;

        if let Some(topic) = self.target_topic_id {
            if topic <= 0 {
                return Err(invalid(
                    "TARGET_TOPIC_ID",
                    topic.to_string(),
                    "topic ids are positive",
                ));
            }
        }

        let mut sources = SourceSet::new(source_channel);
        if let Some(group) = self.source_group_id {
            sources = sources.with_group(group);
        }

        let delivery = match self.delivery_mode.unwrap_or_default() {
            DeliveryMode::Polling => {
                let timeout_secs = self.poll_timeout_secs.unwrap_or(DEFAULT_POLL_TIMEOUT_SECS);
                Delivery::Polling { timeout_secs }
            }
            DeliveryMode::Webhook => {
                let host = non_empty(self.webhook_host).ok_or(ConfigError::Missing("WEBHOOK_HOST"))?;
                let path = self
                    .webhook_path
                    .unwrap_or_else(|| DEFAULT_WEBHOOK_PATH.to_string());
                let secret_token = non_empty(self.webhook_secret);
                if let Some(secret) = &secret_token {
                    validate_secret(secret)?;
                }
                Delivery::Webhook(webhook_config(
                    &host,
                    &path,
                    self.port.unwrap_or(DEFAULT_PORT),
                    secret_token,
                )?)
            }
        };

        let request_timeout_secs = self
            .request_timeout_secs
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS);
        if request_timeout_secs == 0 {
            return Err(invalid("REQUEST_TIMEOUT_SECS", "0", "must be at least 1"));
        }

        let ping_command = self
            .ping_command
            .unwrap_or_else(|| DEFAULT_PING_COMMAND.to_string());
        if !ping_command.starts_with('/') || ping_command.len() < 2 {
            return Err(invalid(
                "PING_COMMAND",
                ping_command,
                "commands start with '/'",
            ));
        }

        Ok(Config {
            bot_token: BotToken(bot_token),
            target: RelayTarget {
                chat_id: target_chat,
                topic_id: self.target_topic_id,
            },
            sources,
            relay_mode: self.relay_mode.unwrap_or_default(),
            ordering: self.dispatch_ordering.unwrap_or_default(),
            delivery,
            drop_pending_updates: self.drop_pending_updates.unwrap_or(true),
            request_timeout: Duration::from_secs(request_timeout_secs),
            shutdown_grace: Duration::from_secs(
                self.shutdown_grace_secs
                    .unwrap_or(DEFAULT_SHUTDOWN_GRACE_SECS),
            ),
            ping_command,
            force_ipv4: self.force_ipv4.unwrap_or(false),
        })
    }
}

/// Telegram allows 1-256 characters from `A-Z a-z 0-9 _ -`.
fn validate_secret(secret: &str) -> Result<(), ConfigError> {
    let ok = secret.len() <= 256
        && secret
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if ok {
        Ok(())
    } else {
        Err(invalid(
            "WEBHOOK_SECRET",
            "<redacted>",
            "use 1-256 characters from A-Z a-z 0-9 _ -",
        ))
    }
}

fn webhook_config(
    host: &str,
    path: &str,
    port: u16,
    secret_token: Option<String>,
) -> Result<WebhookConfig, ConfigError> {
    let host = host
        .trim()
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_end_matches('/');
    let path = path.trim().trim_matches('/');
    if path.is_empty() {
        return Err(invalid("WEBHOOK_PATH", path, "must not be empty"));
    }

    let url = Url::parse(&format!("https://{}/{}", host, path))
        .map_err(|e| invalid("WEBHOOK_HOST", host, e.to_string()))?;

    Ok(WebhookConfig {
        url,
        route: format!("/{}", path),
        port,
        secret_token,
    })
}

impl Config {
    /// Read the optional TOML file, then apply the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with(path, |key| std::env::var(key).ok())
    }

    fn load_with<F>(path: Option<&Path>, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut raw = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.display().to_string(),
                    source,
                })?;
                RawConfig::from_toml_str(&content, path)?
            }
            None => RawConfig::default(),
        };
        raw.overlay(lookup)?;
        raw.validate()
    }

    /// HTTP client timeout: long enough for a full long-poll plus a normal request.
    pub fn http_timeout(&self) -> Duration {
        match &self.delivery {
            Delivery::Polling { timeout_secs } => {
                Duration::from_secs(u64::from(*timeout_secs)) + self.request_timeout
            }
            Delivery::Webhook(_) => self.request_timeout,
        }
    }
}
