//! Per-channel delivery.
//!
//! [`ChannelDispatcher`] is the dispatch table over [`ChannelSettings`]: each
//! variant is routed to the sender registered for its type.

mod email;
mod push;
mod telegram;

pub use email::{EmailSender, SmtpConfig};
pub use push::{PushHub, PushMessage};
pub use telegram::{TelegramConfig, TelegramSender};

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{Channel, ChannelSettings, ChannelType, Reminder};

#[derive(Debug, Error)]
pub enum SendError {
    #[error("SMTP delivery failed: {0}")]
    Smtp(String),

    #[error("Telegram delivery failed: {0}")]
    Telegram(String),

    #[error("No sender configured for {0} channels")]
    NotConfigured(ChannelType),

    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),

    #[error("{sender} sender cannot deliver to a {channel} channel")]
    WrongChannel {
        sender: &'static str,
        channel: ChannelType,
    },
}

/// Delivers one reminder to one channel.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChannelSender: Send + Sync {
    async fn send(&self, channel: &Channel, reminder: &Reminder) -> Result<(), SendError>;
}

#[derive(Clone, Default)]
pub struct ChannelDispatcher {
    email: Option<Arc<dyn ChannelSender>>,
    telegram: Option<Arc<dyn ChannelSender>>,
    push: Option<Arc<dyn ChannelSender>>,
}

impl ChannelDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_email(mut self, sender: Arc<dyn ChannelSender>) -> Self {
        self.email = Some(sender);
        self
    }

    pub fn with_telegram(mut self, sender: Arc<dyn ChannelSender>) -> Self {
        self.telegram = Some(sender);
        self
    }

    /// Sender for both websocket and internal channels.
    pub fn with_push(mut self, sender: Arc<dyn ChannelSender>) -> Self {
        self.push = Some(sender);
        self
    }

    fn sender_for(&self, settings: &ChannelSettings) -> Option<&Arc<dyn ChannelSender>> {
        match settings {
            ChannelSettings::Email { .. } => self.email.as_ref(),
            ChannelSettings::Telegram { .. } => self.telegram.as_ref(),
            ChannelSettings::Websocket {} | ChannelSettings::Internal {} => self.push.as_ref(),
        }
    }

    pub async fn dispatch(&self, channel: &Channel, reminder: &Reminder) -> Result<(), SendError> {
        match self.sender_for(&channel.settings) {
            Some(sender) => sender.send(channel, reminder).await,
            None => Err(SendError::NotConfigured(channel.channel_type())),
        }
    }
}
