//! Delayed publishing of scheduled reminders

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use amqp_broker::ResilientChannel;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::instrument;

use crate::clock::{Clock, system_clock};
use crate::error::{ReminderError, ReminderResult};
use crate::metrics;
use crate::models::Reminder;

/// Hands a scheduled reminder to the broker so it comes back at `reminder.at`.
///
/// An error must make the caller roll back: a `Scheduled` row is only
/// committed together with its message.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReminderPublisher: Send + Sync {
    async fn schedule_reminder(&self, reminder: &Reminder) -> ReminderResult<()>;
}

/// `max(0, at - now)`.
pub fn compute_delay(at: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (at - now).to_std().unwrap_or(Duration::ZERO)
}

pub struct AmqpReminderPublisher {
    channel: ResilientChannel,
    clock: Clock,
}

impl AmqpReminderPublisher {
    pub fn new(channel: ResilientChannel) -> Self {
        Self {
            channel,
            clock: system_clock(),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }
}

#[async_trait]
impl ReminderPublisher for AmqpReminderPublisher {
    #[instrument(skip(self, reminder), fields(reminder_id = reminder.id))]
    async fn schedule_reminder(&self, reminder: &Reminder) -> ReminderResult<()> {
        let delay = compute_delay(reminder.at, (self.clock)());
        let payload = serde_json::to_vec(&reminder.envelope())?;

        self.channel.publish_delayed(&payload, delay).await?;

        metrics::published();
        tracing::debug!(delay_ms = delay.as_millis() as u64, "Published reminder");
        Ok(())
    }
}

/// Publisher that only records what it was asked to publish.
///
/// Useful for running the pipeline without a broker.
#[derive(Clone)]
pub struct RecordingPublisher {
    clock: Clock,
    published: Arc<Mutex<Vec<(Reminder, Duration)>>>,
    failing: bool,
}

impl RecordingPublisher {
    pub fn new(clock: Clock) -> Self {
        Self {
            clock,
            published: Arc::new(Mutex::new(Vec::new())),
            failing: false,
        }
    }

    /// Every publish fails with a broker error.
    pub fn failing(clock: Clock) -> Self {
        Self {
            failing: true,
            ..Self::new(clock)
        }
    }

    /// Reminders published so far with their computed delay.
    pub fn published(&self) -> Vec<(Reminder, Duration)> {
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn published_ids(&self) -> Vec<i64> {
        self.published().iter().map(|(r, _)| r.id).collect()
    }
}

#[async_trait]
impl ReminderPublisher for RecordingPublisher {
    async fn schedule_reminder(&self, reminder: &Reminder) -> ReminderResult<()> {
        if self.failing {
            return Err(ReminderError::Broker("publisher is failing".into()));
        }
        let delay = compute_delay(reminder.at, (self.clock)());
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((reminder.clone(), delay));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::fixed_clock;
    use crate::models::ReminderStatus;
    use chrono::TimeDelta;

    fn reminder(at: DateTime<Utc>) -> Reminder {
        Reminder {
            id: 3,
            created_by: 1,
            at,
            every: None,
            body: "ping".into(),
            status: ReminderStatus::Scheduled,
            created_at: at,
            scheduled_at: Some(at),
            sent_at: None,
            canceled_at: None,
            channel_ids: vec![1],
        }
    }

    #[test]
    fn delay_is_never_negative() {
        let now = Utc::now();
        assert_eq!(
            compute_delay(now + TimeDelta::milliseconds(1500), now),
            Duration::from_millis(1500)
        );
        assert_eq!(compute_delay(now - TimeDelta::minutes(5), now), Duration::ZERO);
        assert_eq!(compute_delay(now, now), Duration::ZERO);
    }

    #[tokio::test]
    async fn recording_publisher_tracks_delay() {
        let now = Utc::now();
        let publisher = RecordingPublisher::new(fixed_clock(now));
        publisher
            .schedule_reminder(&reminder(now + TimeDelta::minutes(30)))
            .await
            .unwrap();

        let published = publisher.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].1, Duration::from_secs(30 * 60));
        assert_eq!(publisher.published_ids(), vec![3]);
    }

    #[tokio::test]
    async fn failing_publisher_reports_broker_error() {
        let publisher = RecordingPublisher::failing(system_clock());
        let err = publisher
            .schedule_reminder(&reminder(Utc::now()))
            .await
            .unwrap_err();
        assert!(err.is_infrastructure());
        assert!(publisher.published().is_empty());
    }
}
