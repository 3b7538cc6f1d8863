use chrono::{DateTime, Utc};
use tracing::{info, warn};

use super::Pipeline;
use crate::error::ReminderResult;
use crate::metrics;
use crate::models::{NewReminder, Reminder, ReminderStatus};
use crate::repository::UowContext;

impl Pipeline {
    /// Create the next occurrence of a recurring reminder inside `ctx`.
    ///
    /// The child is `Scheduled` and published right away when one interval is
    /// shorter than the horizon, and left `Created` for the sweep otherwise.
    pub(crate) async fn recur(
        &self,
        ctx: &dyn UowContext,
        reminder: &Reminder,
        now: DateTime<Utc>,
    ) -> ReminderResult<Option<Reminder>> {
        let Some(every) = reminder.every else {
            return Ok(None);
        };

        let next_at = match every.next_from(reminder.at) {
            Ok(next_at) => next_at,
            Err(e) => {
                warn!(reminder_id = reminder.id, error = %e, "Recurrence ends here");
                return Ok(None);
            }
        };

        let (status, scheduled_at) = if every.total_duration() < self.settings.horizon {
            (ReminderStatus::Scheduled, Some(now))
        } else {
            (ReminderStatus::Created, None)
        };

        let next = ctx
            .reminders()
            .create(NewReminder {
                created_by: reminder.created_by,
                at: next_at,
                every: Some(every),
                body: reminder.body.clone(),
                status,
                scheduled_at,
                created_at: now,
                channel_ids: reminder.channel_ids.clone(),
            })
            .await?;

        if status == ReminderStatus::Scheduled {
            self.publisher.schedule_reminder(&next).await?;
        }

        metrics::recurred();
        info!(
            reminder_id = reminder.id,
            next_id = next.id,
            next_at = %next.at,
            status = %next.status,
            "Created next occurrence"
        );
        Ok(Some(next))
    }
}

#[cfg(test)]
mod tests {
    use crate::every::{Every, Period};
    use crate::models::ReminderStatus;
    use crate::pipeline::testing::*;
    use crate::pipeline::PrepareOutcome;
    use chrono::{DateTime, TimeDelta, Utc};

    #[tokio::test]
    async fn long_interval_child_waits_for_the_sweep() {
        let h = Harness::new();
        let at = start() + TimeDelta::minutes(5);
        let every = Every::new(1, Period::Week).unwrap();
        let reminder = h.scheduled(at, Some(every), vec![1, 2]).await;
        h.clock.set(at);

        let prepared = h.pipeline.prepare(reminder.id, at).await.unwrap();
        let next = prepared.next.unwrap();
        assert_eq!(next.status, ReminderStatus::Created);
        assert_eq!(next.scheduled_at, None);
        assert_eq!(next.at, at + TimeDelta::days(7));
        assert_eq!(next.channel_ids, vec![1, 2]);
        assert!(h.publisher.published().is_empty());
    }

    #[tokio::test]
    async fn short_interval_child_is_published() {
        let h = Harness::new();
        let at = start() + TimeDelta::minutes(5);
        let every = Every::new(30, Period::Minute).unwrap();
        let reminder = h.scheduled(at, Some(every), vec![]).await;
        h.clock.set(at);

        let prepared = h.pipeline.prepare(reminder.id, at).await.unwrap();
        let next = prepared.next.unwrap();
        assert_eq!(next.status, ReminderStatus::Scheduled);
        assert_eq!(next.scheduled_at, Some(at));
        assert_eq!(h.publisher.published_ids(), vec![next.id]);
        assert_eq!(
            h.publisher.published()[0].1,
            std::time::Duration::from_secs(30 * 60)
        );
    }

    #[tokio::test]
    async fn publish_failure_rolls_back_prepare() {
        let h = Harness::with_dispatcher(|_| crate::senders::ChannelDispatcher::new());
        let failing = crate::publisher::RecordingPublisher::failing(h.clock.clock());
        let pipeline = crate::pipeline::Pipeline::new(
            std::sync::Arc::new(h.uow.clone()),
            std::sync::Arc::new(failing),
            crate::senders::ChannelDispatcher::new(),
            crate::config::ReminderSettings::default(),
        )
        .with_clock(h.clock.clock());

        let at = start() + TimeDelta::minutes(5);
        let every = Every::new(10, Period::Minute).unwrap();
        let reminder = h.scheduled(at, Some(every), vec![]).await;
        h.clock.set(at);

        let err = pipeline.prepare(reminder.id, at).await.unwrap_err();
        assert!(err.is_infrastructure());
        assert_eq!(h.get(reminder.id).await.status, ReminderStatus::Scheduled);
        assert_eq!(h.uow.all_reminders().await.len(), 1);
    }

    #[tokio::test]
    async fn overflowing_recurrence_stops_quietly() {
        let h = Harness::new();
        let at = DateTime::<Utc>::MAX_UTC - TimeDelta::days(2);
        let every = Every::new(1, Period::Year).unwrap();
        let reminder = h.scheduled(at, Some(every), vec![]).await;
        h.clock.set(at);

        let prepared = h.pipeline.prepare(reminder.id, at).await.unwrap();
        assert_eq!(prepared.outcome, PrepareOutcome::Sending);
        assert!(prepared.next.is_none());
    }
}
