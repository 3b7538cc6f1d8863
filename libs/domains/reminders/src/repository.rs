//! Repository traits and the unit of work that scopes them.
//!
//! Every repository handed out by a [`UowContext`] observes the same
//! transaction. A context that is dropped without [`UowContext::commit`] rolls
//! back, so callers never have to remember an explicit rollback on error paths.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::ReminderResult;
use crate::models::{
    Channel, ChannelRecord, NewChannel, NewReminder, NewUser, Reminder, ScheduleParams, Session,
    StatusChange, User, UserLimits,
};

#[async_trait]
pub trait ReminderRepository: Send + Sync {
    async fn create(&self, input: NewReminder) -> ReminderResult<Reminder>;

    async fn get(&self, id: i64) -> ReminderResult<Option<Reminder>>;

    /// Read the row under an exclusive lock held until the unit of work ends.
    async fn lock(&self, id: i64) -> ReminderResult<Option<Reminder>>;

    /// Apply a status transition keyed by id.
    async fn update_status(&self, id: i64, change: StatusChange) -> ReminderResult<Reminder>;

    /// Overwrite every mutable column and the channel links.
    async fn update(&self, reminder: &Reminder) -> ReminderResult<Reminder>;

    async fn delete(&self, id: i64) -> ReminderResult<bool>;

    /// Atomically promote `Created` rows with `at < params.at_before` to
    /// `Scheduled` and return exactly the promoted rows.
    async fn schedule(&self, params: ScheduleParams) -> ReminderResult<Vec<Reminder>>;

    /// `SentSuccess` reminders of a user with `sent_at >= since`.
    async fn count_sent_since(&self, user_id: i64, since: DateTime<Utc>) -> ReminderResult<u64>;

    async fn count_active(&self, user_id: i64) -> ReminderResult<u64>;

    async fn list_by_user(&self, user_id: i64) -> ReminderResult<Vec<Reminder>>;

    /// Linked channel ids in fan-out order.
    async fn channel_ids(&self, id: i64) -> ReminderResult<Vec<i64>>;
}

#[async_trait]
pub trait ChannelRepository: Send + Sync {
    async fn create(&self, input: NewChannel) -> ReminderResult<Channel>;

    async fn get(&self, id: i64) -> ReminderResult<Option<Channel>>;

    /// Channels in the order of `ids`. Unknown ids are left out; rows that
    /// fail to decode come back as [`ChannelRecord::Undecodable`].
    async fn read(&self, ids: &[i64]) -> ReminderResult<Vec<ChannelRecord>>;
}

#[async_trait]
pub trait LimitsRepository: Send + Sync {
    /// Limits of a user; a user without a row is unlimited.
    async fn get_user_limits(&self, user_id: i64) -> ReminderResult<UserLimits>;

    /// Same as [`get_user_limits`](Self::get_user_limits), but serializes
    /// against other quota-consuming writers for the same user.
    async fn get_user_limits_with_lock(&self, user_id: i64) -> ReminderResult<UserLimits>;

    async fn set_user_limits(&self, limits: &UserLimits) -> ReminderResult<()>;
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn create(&self, input: NewUser) -> ReminderResult<User>;

    async fn get(&self, id: i64) -> ReminderResult<Option<User>>;
}

#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn create(&self, user_id: i64, expires_at: DateTime<Utc>) -> ReminderResult<Session>;

    async fn get(&self, id: Uuid) -> ReminderResult<Option<Session>>;

    async fn delete(&self, id: Uuid) -> ReminderResult<bool>;
}

/// Opens transactional scopes.
#[async_trait]
pub trait UnitOfWork: Send + Sync {
    async fn begin(&self) -> ReminderResult<Box<dyn UowContext>>;
}

/// One open transaction and the repositories bound to it.
#[async_trait]
pub trait UowContext: Send + Sync {
    fn reminders(&self) -> Box<dyn ReminderRepository + '_>;

    fn channels(&self) -> Box<dyn ChannelRepository + '_>;

    fn limits(&self) -> Box<dyn LimitsRepository + '_>;

    fn users(&self) -> Box<dyn UserRepository + '_>;

    fn sessions(&self) -> Box<dyn SessionRepository + '_>;

    async fn commit(self: Box<Self>) -> ReminderResult<()>;

    async fn rollback(self: Box<Self>) -> ReminderResult<()>;
}
