//! In-process fan-out for websocket and internal channels

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use super::{ChannelSender, SendError};
use crate::models::{Channel, ChannelType, Reminder};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PushMessage {
    pub user_id: i64,
    pub channel_id: i64,
    pub channel_type: ChannelType,
    pub reminder_id: i64,
    pub body: String,
    pub at: DateTime<Utc>,
}

/// Broadcast hub. A message nobody is listening for is dropped, not failed.
#[derive(Debug, Clone)]
pub struct PushHub {
    tx: broadcast::Sender<PushMessage>,
}

impl PushHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PushMessage> {
        self.tx.subscribe()
    }
}

impl Default for PushHub {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl ChannelSender for PushHub {
    async fn send(&self, channel: &Channel, reminder: &Reminder) -> Result<(), SendError> {
        let channel_type = channel.channel_type();
        if !matches!(channel_type, ChannelType::Websocket | ChannelType::Internal) {
            return Err(SendError::WrongChannel {
                sender: "push",
                channel: channel_type,
            });
        }

        let message = PushMessage {
            user_id: channel.created_by,
            channel_id: channel.id,
            channel_type,
            reminder_id: reminder.id,
            body: reminder.body.clone(),
            at: reminder.at,
        };
        if self.tx.send(message).is_err() {
            tracing::debug!(reminder_id = reminder.id, "No push subscribers");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChannelSettings, ReminderStatus, Verification};

    fn reminder() -> Reminder {
        Reminder {
            id: 4,
            created_by: 9,
            at: Utc::now(),
            every: None,
            body: "stretch".into(),
            status: ReminderStatus::Sending,
            created_at: Utc::now(),
            scheduled_at: None,
            sent_at: None,
            canceled_at: None,
            channel_ids: vec![2],
        }
    }

    fn channel(settings: ChannelSettings) -> Channel {
        Channel {
            id: 2,
            created_by: 9,
            settings,
            created_at: Utc::now(),
            verification: Verification::Verified { at: Utc::now() },
        }
    }

    #[tokio::test]
    async fn subscribers_receive_messages() {
        let hub = PushHub::default();
        let mut rx = hub.subscribe();

        hub.send(&channel(ChannelSettings::Internal {}), &reminder())
            .await
            .unwrap();

        let message = rx.recv().await.unwrap();
        assert_eq!(message.reminder_id, 4);
        assert_eq!(message.user_id, 9);
        assert_eq!(message.channel_type, ChannelType::Internal);
    }

    #[tokio::test]
    async fn no_subscribers_is_fine() {
        let hub = PushHub::default();
        hub.send(&channel(ChannelSettings::Websocket {}), &reminder())
            .await
            .unwrap();
    }
}
