//! Fire-time pipeline: Prepare, Recur, Send.
//!
//! Prepare and Recur share one unit of work, so a reminder is only moved out
//! of `Scheduled` together with the creation (and publishing) of its next
//! occurrence. A redelivered message finds the reminder already moved and
//! does nothing, which makes the whole pipeline safe under at-least-once
//! delivery.

mod prepare;
mod recur;
mod send;

pub use prepare::{PrepareOutcome, Prepared};
pub use send::SendReport;

use std::sync::Arc;

use tracing::instrument;

use crate::clock::{Clock, system_clock};
use crate::config::ReminderSettings;
use crate::error::ReminderResult;
use crate::models::ReminderEnvelope;
use crate::publisher::ReminderPublisher;
use crate::repository::UnitOfWork;
use crate::senders::ChannelDispatcher;

#[derive(Clone)]
pub struct Pipeline {
    uow: Arc<dyn UnitOfWork>,
    publisher: Arc<dyn ReminderPublisher>,
    dispatcher: ChannelDispatcher,
    settings: ReminderSettings,
    clock: Clock,
}

/// What one delivery of a message did.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub prepared: Prepared,
    pub sent: Option<SendReport>,
}

impl Pipeline {
    pub fn new(
        uow: Arc<dyn UnitOfWork>,
        publisher: Arc<dyn ReminderPublisher>,
        dispatcher: ChannelDispatcher,
        settings: ReminderSettings,
    ) -> Self {
        Self {
            uow,
            publisher,
            dispatcher,
            settings,
            clock: system_clock(),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Run every stage for one broker message.
    ///
    /// Errors are infrastructure failures (or a missing reminder); everything
    /// with a defined terminal status is reported as `Ok`.
    #[instrument(skip(self), fields(reminder_id = envelope.id))]
    pub async fn run(&self, envelope: ReminderEnvelope) -> ReminderResult<PipelineReport> {
        let prepared = self.prepare(envelope.id, envelope.at).await?;
        let sent = self.send(&prepared.reminder).await?;
        Ok(PipelineReport { prepared, sent })
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use crate::every::{Every, Period};
    use crate::models::{ChannelSettings, ReminderStatus};
    use chrono::TimeDelta;

    #[tokio::test]
    async fn run_delivers_and_schedules_next_occurrence() {
        let h = Harness::new();
        let mut rx = h.hub.subscribe();
        let channel = h.channel(ChannelSettings::Internal {}, true).await;
        let at = start() + TimeDelta::minutes(10);
        let every = Every::new(15, Period::Minute).unwrap();
        let reminder = h.scheduled(at, Some(every), vec![channel]).await;

        h.clock.set(at);
        let report = h.pipeline.run(reminder.envelope()).await.unwrap();

        let sent = report.sent.unwrap();
        assert_eq!(sent.reminder.status, ReminderStatus::SentSuccess);
        assert_eq!(sent.reminder.sent_at, Some(at));
        assert_eq!(rx.recv().await.unwrap().reminder_id, reminder.id);

        let next = report.prepared.next.unwrap();
        assert_eq!(next.at, at + TimeDelta::minutes(15));
        assert_eq!(next.status, ReminderStatus::Scheduled);
        assert_eq!(h.publisher.published_ids(), vec![next.id]);
    }

    #[tokio::test]
    async fn redelivery_is_a_no_op() {
        let h = Harness::new();
        let channel = h.channel(ChannelSettings::Internal {}, true).await;
        let at = start() + TimeDelta::minutes(1);
        let every = Every::new(1, Period::Hour).unwrap();
        let reminder = h.scheduled(at, Some(every), vec![channel]).await;
        h.clock.set(at);

        h.pipeline.run(reminder.envelope()).await.unwrap();
        let again = h.pipeline.run(reminder.envelope()).await.unwrap();

        assert_eq!(again.prepared.outcome, crate::pipeline::PrepareOutcome::Skipped);
        assert!(again.prepared.next.is_none());
        assert!(again.sent.is_none());
        assert_eq!(h.uow.all_reminders().await.len(), 2);
    }
}
