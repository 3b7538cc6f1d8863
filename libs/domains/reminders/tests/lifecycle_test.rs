//! End-to-end reminder lifecycle against the in-memory store.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use domain_reminders::{
    ChannelDispatcher, ChannelSettings, CreateReminder, Every, InMemoryUnitOfWork, ManualClock,
    NewChannel, Period, Pipeline, PrepareOutcome, PushHub, RecordingPublisher, ReminderService,
    ReminderSettings, ReminderStatus, SweepScheduler, UnitOfWork, UserLimits, Verification,
};

const OWNER: i64 = 11;

struct World {
    uow: InMemoryUnitOfWork,
    publisher: RecordingPublisher,
    clock: ManualClock,
    hub: PushHub,
    service: ReminderService,
    scheduler: SweepScheduler,
    pipeline: Pipeline,
}

impl World {
    fn new() -> Self {
        let uow = InMemoryUnitOfWork::new();
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2025, 6, 2, 8, 0, 0).unwrap());
        let publisher = RecordingPublisher::new(clock.clock());
        let hub = PushHub::default();
        let settings = ReminderSettings::default();

        let service = ReminderService::new(
            Arc::new(uow.clone()),
            Arc::new(publisher.clone()),
            settings,
        )
        .with_clock(clock.clock());
        let scheduler = SweepScheduler::new(
            Arc::new(uow.clone()),
            Arc::new(publisher.clone()),
            settings,
        )
        .with_clock(clock.clock());
        let pipeline = Pipeline::new(
            Arc::new(uow.clone()),
            Arc::new(publisher.clone()),
            ChannelDispatcher::new().with_push(Arc::new(hub.clone())),
            settings,
        )
        .with_clock(clock.clock());

        Self {
            uow,
            publisher,
            clock,
            hub,
            service,
            scheduler,
            pipeline,
        }
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    async fn internal_channel(&self) -> i64 {
        let ctx = self.uow.begin().await.unwrap();
        let channel = ctx
            .channels()
            .create(NewChannel {
                created_by: OWNER,
                settings: ChannelSettings::Internal {},
                verification: Verification::Verified { at: self.now() },
            })
            .await
            .unwrap();
        ctx.commit().await.unwrap();
        channel.id
    }
}

#[tokio::test]
async fn daily_reminder_fires_and_recurs() {
    let world = World::new();
    let channels = vec![
        world.internal_channel().await,
        world.internal_channel().await,
    ];
    let mut inbox = world.hub.subscribe();

    let at = world.now() + TimeDelta::minutes(30);
    let reminder = world
        .service
        .create(
            OWNER,
            CreateReminder {
                at,
                every: Some(Every::new(1, Period::Day).unwrap()),
                body: "stand-up".into(),
                channel_ids: channels.clone(),
            },
        )
        .await
        .unwrap();

    assert_eq!(reminder.status, ReminderStatus::Scheduled);
    assert_eq!(reminder.scheduled_at, Some(world.now()));
    let published = world.publisher.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].1, Duration::from_secs(30 * 60));

    // The broker hands the message back at `at`
    world.clock.set(at);
    let report = world.pipeline.run(reminder.envelope()).await.unwrap();

    assert_eq!(report.prepared.outcome, PrepareOutcome::Sending);
    let sent = report.sent.unwrap();
    assert_eq!(sent.delivered, 2);
    assert_eq!(sent.reminder.status, ReminderStatus::SentSuccess);
    assert_eq!(sent.reminder.sent_at, Some(at));

    let next = report.prepared.next.unwrap();
    assert_eq!(next.at, at + TimeDelta::days(1));
    assert_eq!(next.status, ReminderStatus::Created);
    assert_eq!(next.channel_ids, channels);

    for _ in 0..2 {
        let message = inbox.try_recv().unwrap();
        assert_eq!(message.reminder_id, reminder.id);
        assert_eq!(message.body, "stand-up");
    }

    // A redelivered message changes nothing
    let again = world.pipeline.run(reminder.envelope()).await.unwrap();
    assert_eq!(again.prepared.outcome, PrepareOutcome::Skipped);
    assert!(again.sent.is_none());
    assert_eq!(world.uow.all_reminders().await.len(), 2);

    // The sweep picks the next occurrence up once it enters the horizon
    world.clock.set(next.at - TimeDelta::minutes(10));
    assert_eq!(world.scheduler.tick().await.unwrap(), vec![next.id]);
    let (_, delay) = world.publisher.published().last().cloned().unwrap();
    assert_eq!(delay, Duration::from_secs(10 * 60));
}

#[tokio::test]
async fn monthly_quota_stops_delivery_but_not_recurrence() {
    let world = World::new();
    let channel = world.internal_channel().await;
    {
        let ctx = world.uow.begin().await.unwrap();
        ctx.limits()
            .set_user_limits(&UserLimits {
                monthly_sent_reminder_count: Some(0),
                ..UserLimits::unlimited(OWNER)
            })
            .await
            .unwrap();
        ctx.commit().await.unwrap();
    }

    let at = world.now() + TimeDelta::minutes(5);
    let reminder = world
        .service
        .create(
            OWNER,
            CreateReminder {
                at,
                every: Some(Every::new(2, Period::Hour).unwrap()),
                body: "drink water".into(),
                channel_ids: vec![channel],
            },
        )
        .await
        .unwrap();

    world.clock.set(at);
    let report = world.pipeline.run(reminder.envelope()).await.unwrap();

    assert_eq!(report.prepared.outcome, PrepareOutcome::LimitExceeded);
    assert_eq!(
        report.prepared.reminder.status,
        ReminderStatus::SentLimitExceeded
    );
    assert!(report.sent.is_none());
    assert_eq!(
        report.prepared.next.map(|n| n.at),
        Some(at + TimeDelta::hours(2))
    );
}

#[tokio::test]
async fn canceled_reminder_is_skipped_when_it_fires() {
    let world = World::new();
    let channel = world.internal_channel().await;
    let at = world.now() + TimeDelta::minutes(15);
    let reminder = world
        .service
        .create(
            OWNER,
            CreateReminder {
                at,
                every: None,
                body: "call back".into(),
                channel_ids: vec![channel],
            },
        )
        .await
        .unwrap();

    let canceled = world.service.cancel(OWNER, reminder.id).await.unwrap();
    assert_eq!(canceled.status, ReminderStatus::Canceled);

    world.clock.set(at);
    let report = world.pipeline.run(reminder.envelope()).await.unwrap();
    assert_eq!(report.prepared.outcome, PrepareOutcome::Skipped);
    assert!(report.prepared.next.is_none());
    assert!(report.sent.is_none());
}
