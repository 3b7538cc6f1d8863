use tracing::{debug, info, instrument, warn};

use super::Pipeline;
use crate::error::{ReminderError, ReminderResult};
use crate::metrics;
use crate::models::{ChannelRecord, Reminder, ReminderStatus, StatusChange};

#[derive(Debug, Clone)]
pub struct SendReport {
    pub reminder: Reminder,
    pub delivered: usize,
    pub failed: usize,
    /// Unverified channels that were left out
    pub skipped: usize,
}

impl Pipeline {
    /// Deliver a prepared reminder to each of its channels and record the result.
    ///
    /// Returns `None` when the reminder is not `Sending`. The row stays locked
    /// for the whole fan-out, so concurrent redeliveries cannot send twice.
    #[instrument(skip(self, prepared), fields(reminder_id = prepared.id))]
    pub async fn send(&self, prepared: &Reminder) -> ReminderResult<Option<SendReport>> {
        if prepared.status != ReminderStatus::Sending {
            return Ok(None);
        }

        let ctx = self.uow.begin().await?;
        let reminder = ctx
            .reminders()
            .lock(prepared.id)
            .await?
            .ok_or(ReminderError::NotFound(prepared.id))?;
        if reminder.status != ReminderStatus::Sending {
            debug!(status = %reminder.status, "Already sent");
            ctx.rollback().await?;
            return Ok(None);
        }

        let records = ctx.channels().read(&reminder.channel_ids).await?;
        let (mut delivered, mut failed, mut skipped) = (0, 0, 0);

        for record in &records {
            let channel = match record {
                ChannelRecord::Valid(channel) => channel,
                ChannelRecord::Undecodable { id, reason } => {
                    warn!(channel_id = *id, reason = %reason, "Channel cannot be decoded");
                    failed += 1;
                    continue;
                }
            };
            if !channel.is_verified() {
                debug!(channel_id = channel.id, "Skipping unverified channel");
                skipped += 1;
                continue;
            }

            let result = self.dispatcher.dispatch(channel, &reminder).await;
            metrics::channel_delivery(channel.channel_type(), result.is_ok());
            match result {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(channel_id = channel.id, error = %e, "Channel delivery failed");
                    failed += 1;
                }
            }
        }

        let status = if failed == 0 {
            ReminderStatus::SentSuccess
        } else {
            ReminderStatus::SentError
        };
        let now = (self.clock)();
        let reminder = ctx
            .reminders()
            .update_status(reminder.id, StatusChange::sent(status, now))
            .await?;
        ctx.commit().await?;

        metrics::sent(status);
        info!(%status, delivered, failed, skipped, "Reminder sent");
        Ok(Some(SendReport {
            reminder,
            delivered,
            failed,
            skipped,
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::models::{ChannelSettings, ChannelType, ReminderStatus};
    use crate::pipeline::testing::*;
    use crate::senders::{ChannelDispatcher, MockChannelSender, SendError};
    use chrono::TimeDelta;

    #[tokio::test]
    async fn every_channel_is_tried_even_after_a_failure() {
        let h = Harness::with_dispatcher(|hub| {
            let mut telegram = MockChannelSender::new();
            telegram
                .expect_send()
                .times(1)
                .returning(|_, _| Err(SendError::Telegram("chat not found".into())));
            ChannelDispatcher::new()
                .with_telegram(Arc::new(telegram))
                .with_push(Arc::new(hub))
        });
        let mut rx = h.hub.subscribe();

        let telegram = h
            .channel(
                ChannelSettings::Telegram {
                    chat_id: 5,
                    username: None,
                },
                true,
            )
            .await;
        let internal = h.channel(ChannelSettings::Internal {}, true).await;
        let at = start() + TimeDelta::minutes(1);
        let reminder = h.scheduled(at, None, vec![telegram, internal]).await;
        h.clock.set(at);

        let prepared = h.pipeline.prepare(reminder.id, at).await.unwrap();
        let report = h.pipeline.send(&prepared.reminder).await.unwrap().unwrap();

        assert_eq!(report.failed, 1);
        assert_eq!(report.delivered, 1);
        assert_eq!(report.reminder.status, ReminderStatus::SentError);
        assert_eq!(report.reminder.sent_at, Some(at));
        assert_eq!(rx.recv().await.unwrap().channel_id, internal);
    }

    #[tokio::test]
    async fn undecodable_channel_fails_without_blocking_the_rest() {
        let h = Harness::new();
        let mut rx = h.hub.subscribe();
        h.uow
            .insert_channel_row(crate::entity::channel::Model {
                id: 40,
                created_by: USER,
                channel_type: ChannelType::Telegram,
                settings: serde_json::json!({"type": "email", "email": "me@example.com"}),
                created_at: start(),
                verification_token: None,
                verified_at: Some(start()),
            })
            .await;
        let internal = h.channel(ChannelSettings::Internal {}, true).await;
        let at = start() + TimeDelta::minutes(1);
        let reminder = h.scheduled(at, None, vec![40, internal]).await;
        h.clock.set(at);

        let report = h.pipeline.run(reminder.envelope()).await.unwrap();
        let sent = report.sent.unwrap();
        assert_eq!(sent.delivered, 1);
        assert_eq!(sent.failed, 1);
        assert_eq!(sent.reminder.status, ReminderStatus::SentError);
        assert_eq!(h.get(reminder.id).await.status, ReminderStatus::SentError);
        assert_eq!(rx.recv().await.unwrap().channel_id, internal);
    }

    #[tokio::test]
    async fn unverified_channels_are_skipped() {
        let h = Harness::new();
        let pending = h.channel(ChannelSettings::Internal {}, false).await;
        let at = start() + TimeDelta::minutes(1);
        let reminder = h.scheduled(at, None, vec![pending]).await;
        h.clock.set(at);

        let prepared = h.pipeline.prepare(reminder.id, at).await.unwrap();
        let report = h.pipeline.send(&prepared.reminder).await.unwrap().unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(report.delivered, 0);
        assert_eq!(report.reminder.status, ReminderStatus::SentSuccess);
    }

    #[tokio::test]
    async fn missing_sender_marks_error() {
        let h = Harness::with_dispatcher(|_| ChannelDispatcher::new());
        let email = h
            .channel(
                ChannelSettings::Email {
                    email: "me@example.com".into(),
                },
                true,
            )
            .await;
        let at = start() + TimeDelta::minutes(1);
        let reminder = h.scheduled(at, None, vec![email]).await;
        h.clock.set(at);

        let prepared = h.pipeline.prepare(reminder.id, at).await.unwrap();
        let report = h.pipeline.send(&prepared.reminder).await.unwrap().unwrap();
        assert_eq!(report.reminder.status, ReminderStatus::SentError);
    }

    #[tokio::test]
    async fn not_sending_is_a_no_op() {
        let h = Harness::new();
        let at = start() + TimeDelta::minutes(1);
        let reminder = h.scheduled(at, None, vec![]).await;
        assert!(h.pipeline.send(&reminder).await.unwrap().is_none());
        assert_eq!(h.get(reminder.id).await.status, ReminderStatus::Scheduled);
    }

    #[tokio::test]
    async fn second_send_finds_terminal_state() {
        let h = Harness::new();
        let at = start() + TimeDelta::minutes(1);
        let reminder = h.scheduled(at, None, vec![]).await;
        h.clock.set(at);

        let prepared = h.pipeline.prepare(reminder.id, at).await.unwrap();
        assert!(h.pipeline.send(&prepared.reminder).await.unwrap().is_some());
        assert!(h.pipeline.send(&prepared.reminder).await.unwrap().is_none());
    }
}
