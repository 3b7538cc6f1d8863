//! Periodic sweep that moves reminders entering the horizon onto the broker

use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, instrument};

use crate::cancel::{cancellable, shutdown_requested};
use crate::clock::{Clock, system_clock};
use crate::config::ReminderSettings;
use crate::error::ReminderResult;
use crate::metrics;
use crate::models::ScheduleParams;
use crate::publisher::ReminderPublisher;
use crate::repository::UnitOfWork;

pub struct SweepScheduler {
    uow: Arc<dyn UnitOfWork>,
    publisher: Arc<dyn ReminderPublisher>,
    settings: ReminderSettings,
    clock: Clock,
}

impl SweepScheduler {
    pub fn new(
        uow: Arc<dyn UnitOfWork>,
        publisher: Arc<dyn ReminderPublisher>,
        settings: ReminderSettings,
    ) -> Self {
        Self {
            uow,
            publisher,
            settings,
            clock: system_clock(),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// One sweep. Either every promoted reminder is published and the
    /// promotion committed, or nothing is.
    ///
    /// Returns the ids that were promoted.
    #[instrument(skip(self))]
    pub async fn tick(&self) -> ReminderResult<Vec<i64>> {
        let now = (self.clock)();
        let ctx = self.uow.begin().await?;

        let promoted = ctx
            .reminders()
            .schedule(ScheduleParams {
                at_before: now + self.settings.horizon,
                scheduled_at: now,
            })
            .await?;

        for reminder in &promoted {
            // Returning early drops ctx, which rolls the promotion back
            self.publisher.schedule_reminder(reminder).await?;
        }

        ctx.commit().await?;

        let ids: Vec<i64> = promoted.iter().map(|r| r.id).collect();
        if ids.is_empty() {
            debug!("Nothing to schedule");
        } else {
            metrics::promoted(ids.len());
            info!(count = ids.len(), reminder_ids = ?ids, "Scheduled reminders");
        }
        Ok(ids)
    }

    /// Sweep every `sweep_interval` until shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.settings.sweep_interval.as_secs(),
            horizon_secs = self.settings.horizon.num_seconds(),
            "Starting sweep scheduler"
        );

        let mut ticker = interval(self.settings.sweep_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown_requested(&mut shutdown) => break,
                _ = ticker.tick() => {}
            }

            match cancellable(&shutdown, self.tick()).await {
                Ok(_) => {}
                Err(e) if e.is_cancelled() => break,
                // Rows stay Created and are retried on the next tick
                Err(e) => error!(error = %e, "Sweep failed"),
            }
        }
        info!("Sweep scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::fixed_clock;
    use crate::memory::InMemoryUnitOfWork;
    use crate::models::{NewReminder, ReminderStatus};
    use crate::publisher::{MockReminderPublisher, RecordingPublisher};
    use chrono::{DateTime, TimeDelta, Utc};
    use std::time::Duration;

    async fn seed(uow: &InMemoryUnitOfWork, ats: &[DateTime<Utc>]) -> Vec<i64> {
        let ctx = uow.begin().await.unwrap();
        let mut ids = Vec::new();
        for at in ats {
            let reminder = ctx
                .reminders()
                .create(NewReminder {
                    created_by: 1,
                    at: *at,
                    every: None,
                    body: "sweep me".into(),
                    status: ReminderStatus::Created,
                    scheduled_at: None,
                    created_at: Utc::now(),
                    channel_ids: vec![1],
                })
                .await
                .unwrap();
            ids.push(reminder.id);
        }
        ctx.commit().await.unwrap();
        ids
    }

    #[tokio::test]
    async fn tick_promotes_and_publishes_due_reminders() {
        let now = Utc::now();
        let uow = InMemoryUnitOfWork::new();
        let ids = seed(
            &uow,
            &[now + TimeDelta::minutes(5), now + TimeDelta::hours(3)],
        )
        .await;

        let publisher = RecordingPublisher::new(fixed_clock(now));
        let scheduler = SweepScheduler::new(
            Arc::new(uow.clone()),
            Arc::new(publisher.clone()),
            ReminderSettings::default(),
        )
        .with_clock(fixed_clock(now));

        assert_eq!(scheduler.tick().await.unwrap(), vec![ids[0]]);
        assert_eq!(publisher.published_ids(), vec![ids[0]]);
        assert_eq!(publisher.published()[0].1, Duration::from_secs(300));

        let stored = uow.all_reminders().await;
        assert_eq!(stored[0].status, ReminderStatus::Scheduled);
        assert_eq!(stored[0].scheduled_at, Some(now));
        assert_eq!(stored[1].status, ReminderStatus::Created);

        // Already promoted rows are not published twice
        assert!(scheduler.tick().await.unwrap().is_empty());
        assert_eq!(publisher.published().len(), 1);
    }

    #[tokio::test]
    async fn publish_failure_rolls_back_the_whole_tick() {
        let now = Utc::now();
        let uow = InMemoryUnitOfWork::new();
        seed(
            &uow,
            &[now + TimeDelta::minutes(1), now + TimeDelta::minutes(2)],
        )
        .await;

        let mut publisher = MockReminderPublisher::new();
        let mut calls = 0;
        publisher.expect_schedule_reminder().returning(move |_| {
            calls += 1;
            if calls == 2 {
                Err(crate::error::ReminderError::Broker("connection reset".into()))
            } else {
                Ok(())
            }
        });

        let scheduler = SweepScheduler::new(
            Arc::new(uow.clone()),
            Arc::new(publisher),
            ReminderSettings::default(),
        )
        .with_clock(fixed_clock(now));

        let err = scheduler.tick().await.unwrap_err();
        assert!(err.is_infrastructure());
        for reminder in uow.all_reminders().await {
            assert_eq!(reminder.status, ReminderStatus::Created);
            assert_eq!(reminder.scheduled_at, None);
        }
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let uow = InMemoryUnitOfWork::new();
        let scheduler = SweepScheduler::new(
            Arc::new(uow),
            Arc::new(RecordingPublisher::new(system_clock())),
            ReminderSettings::default().with_sweep_interval(Duration::from_millis(10)),
        );

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(async move { scheduler.run(rx).await });
        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
