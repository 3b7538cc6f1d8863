use chrono::{DateTime, Datelike, NaiveTime, TimeDelta, Utc};
use tracing::{debug, info, instrument};

use super::Pipeline;
use crate::error::{ReminderError, ReminderResult};
use crate::metrics;
use crate::models::{Reminder, ReminderStatus, StatusChange};

/// Tolerance when comparing the scheduled `at` with the stored one.
const AT_TOLERANCE: TimeDelta = TimeDelta::seconds(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrepareOutcome {
    /// Moved to `Sending`
    Sending,
    /// Monthly quota used up; moved to `SentLimitExceeded`
    LimitExceeded,
    /// Fired too late to be useful; moved to `Canceled`
    Stale,
    /// Not `Scheduled`, or rescheduled since the message was published
    Skipped,
}

impl PrepareOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrepareOutcome::Sending => "sending",
            PrepareOutcome::LimitExceeded => "limit_exceeded",
            PrepareOutcome::Stale => "stale",
            PrepareOutcome::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Prepared {
    pub outcome: PrepareOutcome,
    /// The reminder as committed (or as found, when skipped)
    pub reminder: Reminder,
    /// Next occurrence of a recurring reminder, created in the same unit of work
    pub next: Option<Reminder>,
}

impl Prepared {
    pub fn transitioned(&self) -> bool {
        self.outcome != PrepareOutcome::Skipped
    }
}

/// Midnight UTC on the first day of `now`'s month.
pub(crate) fn month_start(now: DateTime<Utc>) -> DateTime<Utc> {
    let date = now.date_naive();
    date.with_day(1)
        .unwrap_or(date)
        .and_time(NaiveTime::MIN)
        .and_utc()
}

impl Pipeline {
    /// Move a fired reminder out of `Scheduled`.
    ///
    /// `at` is the fire time carried by the broker message. Calling this
    /// again for the same message is a no-op.
    #[instrument(skip(self))]
    pub async fn prepare(&self, id: i64, at: DateTime<Utc>) -> ReminderResult<Prepared> {
        let now = (self.clock)();
        let ctx = self.uow.begin().await?;

        let reminder = ctx
            .reminders()
            .lock(id)
            .await?
            .ok_or(ReminderError::NotFound(id))?;

        if reminder.status != ReminderStatus::Scheduled || (reminder.at - at).abs() > AT_TOLERANCE {
            debug!(
                status = %reminder.status,
                stored_at = %reminder.at,
                message_at = %at,
                "Nothing to prepare"
            );
            ctx.rollback().await?;
            metrics::prepared(PrepareOutcome::Skipped.as_str());
            return Ok(Prepared {
                outcome: PrepareOutcome::Skipped,
                reminder,
                next: None,
            });
        }

        let mut outcome = PrepareOutcome::Sending;
        let mut change = StatusChange::to(ReminderStatus::Sending);

        let limits = ctx
            .limits()
            .get_user_limits_with_lock(reminder.created_by)
            .await?;
        if let Some(limit) = limits.monthly_sent_reminder_count {
            let sent = ctx
                .reminders()
                .count_sent_since(reminder.created_by, month_start(now))
                .await?;
            if sent >= u64::from(limit) {
                info!(sent, limit, "Monthly limit reached");
                outcome = PrepareOutcome::LimitExceeded;
                change = StatusChange::canceled(ReminderStatus::SentLimitExceeded, now);
            }
        }

        // Staleness wins over the limit outcome
        if now - reminder.at > self.settings.max_sending_delay {
            info!(late_by_secs = (now - reminder.at).num_seconds(), "Reminder is stale");
            outcome = PrepareOutcome::Stale;
            change = StatusChange::canceled(ReminderStatus::Canceled, now);
        }

        let updated = ctx.reminders().update_status(id, change).await?;
        let next = self.recur(ctx.as_ref(), &updated, now).await?;
        ctx.commit().await?;

        metrics::prepared(outcome.as_str());
        debug!(outcome = outcome.as_str(), "Prepared reminder");
        Ok(Prepared {
            outcome,
            reminder: updated,
            next,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::every::{Every, Period};
    use crate::models::{NewReminder, UserLimits};
    use crate::pipeline::testing::*;
    use chrono::TimeZone;
    use crate::repository::UnitOfWork;

    #[test]
    fn month_start_is_first_midnight() {
        let now = Utc.with_ymd_and_hms(2025, 7, 19, 17, 45, 3).unwrap();
        assert_eq!(month_start(now), Utc.with_ymd_and_hms(2025, 7, 1, 0, 0, 0).unwrap());
    }

    #[tokio::test]
    async fn first_call_moves_to_sending_second_is_a_no_op() {
        let h = Harness::new();
        let at = start() + TimeDelta::minutes(5);
        let reminder = h.scheduled(at, None, vec![]).await;
        h.clock.set(at);

        let first = h.pipeline.prepare(reminder.id, at).await.unwrap();
        assert_eq!(first.outcome, PrepareOutcome::Sending);
        assert_eq!(first.reminder.status, ReminderStatus::Sending);

        let second = h.pipeline.prepare(reminder.id, at).await.unwrap();
        assert_eq!(second.outcome, PrepareOutcome::Skipped);
        assert_eq!(second.reminder.status, ReminderStatus::Sending);
    }

    #[tokio::test]
    async fn edited_reminder_is_left_scheduled() {
        let h = Harness::new();
        let at = start() + TimeDelta::minutes(5);
        let reminder = h.scheduled(at, None, vec![]).await;
        h.clock.set(at);

        let stale_at = at - TimeDelta::minutes(2);
        let prepared = h.pipeline.prepare(reminder.id, stale_at).await.unwrap();
        assert_eq!(prepared.outcome, PrepareOutcome::Skipped);
        assert_eq!(h.get(reminder.id).await.status, ReminderStatus::Scheduled);
    }

    #[tokio::test]
    async fn sub_second_drift_is_tolerated() {
        let h = Harness::new();
        let at = start() + TimeDelta::minutes(5);
        let reminder = h.scheduled(at, None, vec![]).await;
        h.clock.set(at);

        let prepared = h
            .pipeline
            .prepare(reminder.id, at + TimeDelta::milliseconds(900))
            .await
            .unwrap();
        assert_eq!(prepared.outcome, PrepareOutcome::Sending);
    }

    #[tokio::test]
    async fn monthly_limit_cancels_and_commits() {
        let h = Harness::new();
        h.limits(UserLimits {
            monthly_sent_reminder_count: Some(100),
            ..UserLimits::unlimited(USER)
        })
        .await;

        let ctx = h.uow.begin().await.unwrap();
        for _ in 0..100 {
            let r = ctx
                .reminders()
                .create(NewReminder {
                    created_by: USER,
                    at: start(),
                    every: None,
                    body: "old".into(),
                    status: ReminderStatus::SentSuccess,
                    scheduled_at: None,
                    created_at: start(),
                    channel_ids: vec![],
                })
                .await
                .unwrap();
            ctx.reminders()
                .update_status(r.id, StatusChange::sent(ReminderStatus::SentSuccess, start()))
                .await
                .unwrap();
        }
        ctx.commit().await.unwrap();

        let at = start() + TimeDelta::minutes(5);
        let reminder = h.scheduled(at, None, vec![]).await;
        h.clock.set(at);

        let prepared = h.pipeline.prepare(reminder.id, at).await.unwrap();
        assert_eq!(prepared.outcome, PrepareOutcome::LimitExceeded);

        let stored = h.get(reminder.id).await;
        assert_eq!(stored.status, ReminderStatus::SentLimitExceeded);
        assert_eq!(stored.canceled_at, Some(at));
    }

    #[tokio::test]
    async fn sends_from_previous_month_do_not_count() {
        let h = Harness::new();
        h.limits(UserLimits {
            monthly_sent_reminder_count: Some(1),
            ..UserLimits::unlimited(USER)
        })
        .await;
        let old = h
            .insert(start(), None, ReminderStatus::Sending, vec![])
            .await;
        let ctx = h.uow.begin().await.unwrap();
        let last_month = month_start(start()) - TimeDelta::seconds(1);
        ctx.reminders()
            .update_status(old.id, StatusChange::sent(ReminderStatus::SentSuccess, last_month))
            .await
            .unwrap();
        ctx.commit().await.unwrap();

        let at = start() + TimeDelta::minutes(5);
        let reminder = h.scheduled(at, None, vec![]).await;
        h.clock.set(at);
        let prepared = h.pipeline.prepare(reminder.id, at).await.unwrap();
        assert_eq!(prepared.outcome, PrepareOutcome::Sending);
    }

    #[tokio::test]
    async fn stale_reminder_is_canceled() {
        let h = Harness::new();
        let at = start() + TimeDelta::minutes(5);
        let reminder = h.scheduled(at, None, vec![]).await;
        h.clock.set(at + TimeDelta::hours(2));

        let prepared = h.pipeline.prepare(reminder.id, at).await.unwrap();
        assert_eq!(prepared.outcome, PrepareOutcome::Stale);
        assert_eq!(prepared.reminder.status, ReminderStatus::Canceled);
        assert_eq!(prepared.reminder.canceled_at, Some(at + TimeDelta::hours(2)));
    }

    #[tokio::test]
    async fn staleness_overrides_limit() {
        let h = Harness::new();
        h.limits(UserLimits {
            monthly_sent_reminder_count: Some(0),
            ..UserLimits::unlimited(USER)
        })
        .await;
        let at = start() + TimeDelta::minutes(5);
        let reminder = h.scheduled(at, None, vec![]).await;
        h.clock.set(at + TimeDelta::hours(2));

        let prepared = h.pipeline.prepare(reminder.id, at).await.unwrap();
        assert_eq!(prepared.outcome, PrepareOutcome::Stale);
        assert_eq!(prepared.reminder.status, ReminderStatus::Canceled);
    }

    #[tokio::test]
    async fn missing_reminder_is_not_found() {
        let h = Harness::new();
        let err = h.pipeline.prepare(404, start()).await.unwrap_err();
        assert!(matches!(err, ReminderError::NotFound(404)));
    }

    #[tokio::test]
    async fn recurrence_continues_through_limit_exceeded() {
        let h = Harness::new();
        h.limits(UserLimits {
            monthly_sent_reminder_count: Some(0),
            ..UserLimits::unlimited(USER)
        })
        .await;
        let at = start() + TimeDelta::minutes(5);
        let every = Every::new(1, Period::Day).unwrap();
        let reminder = h.scheduled(at, Some(every), vec![3]).await;
        h.clock.set(at);

        let prepared = h.pipeline.prepare(reminder.id, at).await.unwrap();
        assert_eq!(prepared.outcome, PrepareOutcome::LimitExceeded);

        let next = prepared.next.unwrap();
        assert_eq!(next.at, every.next_from(at).unwrap());
        assert_eq!(next.channel_ids, vec![3]);
        assert_eq!(h.uow.all_reminders().await.len(), 2);
    }
}
