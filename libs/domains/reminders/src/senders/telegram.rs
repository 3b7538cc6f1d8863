//! Telegram Bot API delivery

use std::time::Duration;

use async_trait::async_trait;
use core_config::{ConfigError, FromEnv, env_or_default};
use serde::Serialize;
use tracing::debug;

use super::{ChannelSender, SendError};
use crate::models::{Channel, ChannelSettings, Reminder};

#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub api_url: String,
    pub bot_token: String,
    pub timeout: Duration,
}

impl TelegramConfig {
    pub fn new(bot_token: impl Into<String>) -> Self {
        Self {
            api_url: "https://api.telegram.org".to_string(),
            bot_token: bot_token.into(),
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    /// `None` when no bot token is configured.
    pub fn from_env_optional() -> Result<Option<Self>, ConfigError> {
        match std::env::var("TELEGRAM_BOT_TOKEN") {
            Ok(token) if !token.trim().is_empty() => Self::from_env().map(Some),
            _ => Ok(None),
        }
    }
}

impl FromEnv for TelegramConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let bot_token = core_config::env_required("TELEGRAM_BOT_TOKEN")?;
        Ok(Self::new(bot_token)
            .with_api_url(env_or_default("TELEGRAM_API_URL", "https://api.telegram.org")))
    }
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: i64,
    text: &'a str,
}

pub struct TelegramSender {
    client: reqwest::Client,
    config: TelegramConfig,
}

impl TelegramSender {
    pub fn new(config: TelegramConfig) -> Result<Self, SendError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| SendError::Telegram(format!("failed to build client: {e}")))?;
        Ok(Self { client, config })
    }

    fn send_message_url(&self) -> String {
        format!(
            "{}/bot{}/sendMessage",
            self.config.api_url.trim_end_matches('/'),
            self.config.bot_token
        )
    }
}

#[async_trait]
impl ChannelSender for TelegramSender {
    async fn send(&self, channel: &Channel, reminder: &Reminder) -> Result<(), SendError> {
        let ChannelSettings::Telegram { chat_id, .. } = &channel.settings else {
            return Err(SendError::WrongChannel {
                sender: "telegram",
                channel: channel.channel_type(),
            });
        };

        debug!(reminder_id = reminder.id, channel_id = channel.id, "Sending telegram message");
        let response = self
            .client
            .post(self.send_message_url())
            .json(&SendMessage {
                chat_id: *chat_id,
                text: &reminder.body,
            })
            .send()
            .await
            .map_err(|e| SendError::Telegram(e.without_url().to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(SendError::Telegram(format!("Bot API returned {status}: {body}")))
    }
}
