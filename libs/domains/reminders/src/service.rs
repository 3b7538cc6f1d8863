use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, instrument};
use validator::Validate;

use crate::clock::{Clock, system_clock};
use crate::config::ReminderSettings;
use crate::error::{ReminderError, ReminderResult};
use crate::every::Every;
use crate::models::{
    ChannelRecord, CreateReminder, NewReminder, Reminder, ReminderStatus, StatusChange,
    UpdateReminder, UserLimits, dedup_channel_ids,
};
use crate::publisher::ReminderPublisher;
use crate::repository::{UnitOfWork, UowContext};

/// Create, edit, cancel and delete reminders on behalf of their owner.
#[derive(Clone)]
pub struct ReminderService {
    uow: Arc<dyn UnitOfWork>,
    publisher: Arc<dyn ReminderPublisher>,
    settings: ReminderSettings,
    clock: Clock,
}

impl ReminderService {
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

    /// `Scheduled` when `at` falls inside the horizon, `Created` otherwise.
    fn initial_status(
        &self,
        at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> (ReminderStatus, Option<DateTime<Utc>>) {
        if at < now + self.settings.horizon {
            (ReminderStatus::Scheduled, Some(now))
        } else {
            (ReminderStatus::Created, None)
        }
    }

    #[instrument(skip(self, input))]
    pub async fn create(&self, user_id: i64, input: CreateReminder) -> ReminderResult<Reminder> {
        input.validate()?;
        if let Some(every) = &input.every {
            every.validate()?;
        }
        let now = (self.clock)();
        ensure_future(input.at, now)?;
        let channel_ids = dedup_channel_ids(&input.channel_ids);

        let ctx = self.uow.begin().await?;
        check_channels(ctx.as_ref(), user_id, &channel_ids).await?;

        let limits = ctx.limits().get_user_limits_with_lock(user_id).await?;
        if let Some(limit) = limits.active_reminder_count {
            let active = ctx.reminders().count_active(user_id).await?;
            if active >= u64::from(limit) {
                return Err(ReminderError::ActiveLimitExceeded { limit });
            }
        }
        check_frequency(&limits, input.every)?;

        let (status, scheduled_at) = self.initial_status(input.at, now);
        let reminder = ctx
            .reminders()
            .create(NewReminder {
                created_by: user_id,
                at: input.at,
                every: input.every,
                body: input.body,
                status,
                scheduled_at,
                created_at: now,
                channel_ids,
            })
            .await?;

        if status == ReminderStatus::Scheduled {
            self.publisher.schedule_reminder(&reminder).await?;
        }
        ctx.commit().await?;

        info!(reminder_id = reminder.id, %status, at = %reminder.at, "Created reminder");
        Ok(reminder)
    }

    #[instrument(skip(self, input))]
    pub async fn update(
        &self,
        user_id: i64,
        id: i64,
        input: UpdateReminder,
    ) -> ReminderResult<Reminder> {
        input.validate()?;
        let now = (self.clock)();

        let ctx = self.uow.begin().await?;
        let current = lock_owned_active(ctx.as_ref(), user_id, id).await?;
        let mut updated = current.clone();

        if let Some(at) = input.at {
            ensure_future(at, now)?;
            updated.at = at;
        }
        if let Some(every) = input.every {
            if let Some(every) = &every {
                every.validate()?;
            }
            updated.every = every;
        }
        if let Some(body) = input.body {
            updated.body = body;
        }
        if let Some(channel_ids) = input.channel_ids {
            let channel_ids = dedup_channel_ids(&channel_ids);
            check_channels(ctx.as_ref(), user_id, &channel_ids).await?;
            updated.channel_ids = channel_ids;
        }
        if updated.every != current.every {
            let limits = ctx.limits().get_user_limits_with_lock(user_id).await?;
            check_frequency(&limits, updated.every)?;
        }

        let rescheduled = updated.at != current.at;
        if rescheduled {
            if current.status == ReminderStatus::Sending {
                return Err(ReminderError::NotActive {
                    id,
                    status: current.status,
                });
            }
            // The message already published for the old time is ignored at fire time
            let (status, scheduled_at) = self.initial_status(updated.at, now);
            updated.status = status;
            updated.scheduled_at = scheduled_at;
        }

        let saved = ctx.reminders().update(&updated).await?;
        if rescheduled && saved.status == ReminderStatus::Scheduled {
            self.publisher.schedule_reminder(&saved).await?;
        }
        ctx.commit().await?;

        info!(reminder_id = id, rescheduled, status = %saved.status, "Updated reminder");
        Ok(saved)
    }

    /// Stop an active reminder. Terminal reminders cannot be canceled.
    #[instrument(skip(self))]
    pub async fn cancel(&self, user_id: i64, id: i64) -> ReminderResult<Reminder> {
        let now = (self.clock)();
        let ctx = self.uow.begin().await?;
        lock_owned_active(ctx.as_ref(), user_id, id).await?;

        let reminder = ctx
            .reminders()
            .update_status(id, StatusChange::canceled(ReminderStatus::Canceled, now))
            .await?;
        ctx.commit().await?;

        info!(reminder_id = id, "Canceled reminder");
        Ok(reminder)
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, user_id: i64, id: i64) -> ReminderResult<()> {
        let ctx = self.uow.begin().await?;
        let reminder = ctx
            .reminders()
            .lock(id)
            .await?
            .ok_or(ReminderError::NotFound(id))?;
        ensure_owner(&reminder, user_id)?;

        ctx.reminders().delete(id).await?;
        ctx.commit().await?;

        info!(reminder_id = id, "Deleted reminder");
        Ok(())
    }

    pub async fn get(&self, user_id: i64, id: i64) -> ReminderResult<Reminder> {
        let ctx = self.uow.begin().await?;
        let reminder = ctx
            .reminders()
            .get(id)
            .await?
            .ok_or(ReminderError::NotFound(id))?;
        ensure_owner(&reminder, user_id)?;
        Ok(reminder)
    }

    pub async fn list(&self, user_id: i64) -> ReminderResult<Vec<Reminder>> {
        let ctx = self.uow.begin().await?;
        let reminders = ctx.reminders().list_by_user(user_id).await?;
        Ok(reminders)
    }
}

fn ensure_future(at: DateTime<Utc>, now: DateTime<Utc>) -> ReminderResult<()> {
    if at <= now {
        return Err(ReminderError::Validation(format!(
            "reminder time {at} is not in the future"
        )));
    }
    Ok(())
}

fn ensure_owner(reminder: &Reminder, user_id: i64) -> ReminderResult<()> {
    if reminder.created_by != user_id {
        return Err(ReminderError::PermissionDenied {
            user_id,
            reminder_id: reminder.id,
        });
    }
    Ok(())
}

async fn lock_owned_active(
    ctx: &dyn UowContext,
    user_id: i64,
    id: i64,
) -> ReminderResult<Reminder> {
    let reminder = ctx
        .reminders()
        .lock(id)
        .await?
        .ok_or(ReminderError::NotFound(id))?;
    ensure_owner(&reminder, user_id)?;
    if !reminder.is_active() {
        return Err(ReminderError::NotActive {
            id,
            status: reminder.status,
        });
    }
    Ok(reminder)
}

/// Every id must name a verified channel owned by `user_id`.
async fn check_channels(ctx: &dyn UowContext, user_id: i64, ids: &[i64]) -> ReminderResult<()> {
    let channels = ctx.channels().read(ids).await?;
    for id in ids {
        let channel = match channels.iter().find(|r| r.id() == *id) {
            Some(ChannelRecord::Valid(channel)) if channel.created_by == user_id => channel,
            Some(ChannelRecord::Undecodable { reason, .. }) => {
                return Err(ReminderError::Internal(format!(
                    "channel {id} cannot be decoded: {reason}"
                )));
            }
            _ => return Err(ReminderError::ChannelNotFound(*id)),
        };
        if !channel.is_verified() {
            return Err(ReminderError::ChannelNotVerified(*id));
        }
    }
    Ok(())
}

fn check_frequency(limits: &UserLimits, every: Option<Every>) -> ReminderResult<()> {
    if let (Some(limit), Some(every)) = (limits.reminder_every_per_day_count, every) {
        let per_day = every.per_day_count();
        if per_day > limit {
            return Err(ReminderError::FrequencyLimitExceeded {
                every,
                per_day,
                limit,
            });
        }
    }
    Ok(())
}
