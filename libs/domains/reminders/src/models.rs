use chrono::{DateTime, Utc};
use sea_orm::sea_query::StringLen;
use sea_orm::{DeriveActiveEnum, EnumIter};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;
use validator::Validate;

use crate::every::Every;

/// Reminder lifecycle.
///
/// `Created -> Scheduled -> Sending -> SentSuccess | SentError`, with
/// `SentLimitExceeded` and `Canceled` as the other terminal states.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    Default,
    DeriveActiveEnum,
    EnumIter,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(24))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ReminderStatus {
    /// Waiting for the sweep to bring it inside the horizon
    #[default]
    #[sea_orm(string_value = "created")]
    Created,
    /// Published to the broker with a delay
    #[sea_orm(string_value = "scheduled")]
    Scheduled,
    #[sea_orm(string_value = "sending")]
    Sending,
    #[sea_orm(string_value = "sent_success")]
    SentSuccess,
    #[sea_orm(string_value = "sent_error")]
    SentError,
    #[sea_orm(string_value = "sent_limit_exceeded")]
    SentLimitExceeded,
    #[sea_orm(string_value = "canceled")]
    Canceled,
}

impl ReminderStatus {
    pub const ACTIVE: [ReminderStatus; 3] = [
        ReminderStatus::Created,
        ReminderStatus::Scheduled,
        ReminderStatus::Sending,
    ];

    pub fn is_active(&self) -> bool {
        Self::ACTIVE.contains(self)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reminder {
    pub id: i64,
    pub created_by: i64,
    /// Fire instant
    pub at: DateTime<Utc>,
    pub every: Option<Every>,
    pub body: String,
    pub status: ReminderStatus,
    pub created_at: DateTime<Utc>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub canceled_at: Option<DateTime<Utc>>,
    /// Delivery fan-out order
    pub channel_ids: Vec<i64>,
}

impl Reminder {
    /// Whether the pipeline (or an edit) may still change this reminder.
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    pub fn envelope(&self) -> ReminderEnvelope {
        ReminderEnvelope {
            id: self.id,
            at: self.at,
        }
    }
}

/// Message body published to the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderEnvelope {
    pub id: i64,
    pub at: DateTime<Utc>,
}

/// Row to insert through [`crate::ReminderRepository::create`].
#[derive(Debug, Clone, PartialEq)]
pub struct NewReminder {
    pub created_by: i64,
    pub at: DateTime<Utc>,
    pub every: Option<Every>,
    pub body: String,
    pub status: ReminderStatus,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub channel_ids: Vec<i64>,
}

/// Status transition applied by the pipeline.
///
/// Timestamps left as `None` are not touched, so an already recorded
/// `sent_at` or `canceled_at` is never cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusChange {
    pub status: ReminderStatus,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub canceled_at: Option<DateTime<Utc>>,
}

impl StatusChange {
    pub fn to(status: ReminderStatus) -> Self {
        Self {
            status,
            scheduled_at: None,
            sent_at: None,
            canceled_at: None,
        }
    }

    pub fn scheduled(at: DateTime<Utc>) -> Self {
        Self {
            scheduled_at: Some(at),
            ..Self::to(ReminderStatus::Scheduled)
        }
    }

    pub fn sent(status: ReminderStatus, at: DateTime<Utc>) -> Self {
        Self {
            sent_at: Some(at),
            ..Self::to(status)
        }
    }

    pub fn canceled(status: ReminderStatus, at: DateTime<Utc>) -> Self {
        Self {
            canceled_at: Some(at),
            ..Self::to(status)
        }
    }

    pub fn apply(&self, reminder: &mut Reminder) {
        reminder.status = self.status;
        if let Some(at) = self.scheduled_at {
            reminder.scheduled_at = Some(at);
        }
        if let Some(at) = self.sent_at {
            reminder.sent_at = Some(at);
        }
        if let Some(at) = self.canceled_at {
            reminder.canceled_at = Some(at);
        }
    }
}

/// Arguments of the sweep's atomic promotion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleParams {
    /// Promote rows with `at` strictly before this instant
    pub at_before: DateTime<Utc>,
    pub scheduled_at: DateTime<Utc>,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    DeriveActiveEnum,
    EnumIter,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ChannelType {
    #[sea_orm(string_value = "email")]
    Email,
    #[sea_orm(string_value = "telegram")]
    Telegram,
    #[sea_orm(string_value = "websocket")]
    Websocket,
    #[sea_orm(string_value = "internal")]
    Internal,
}

/// Per-type channel settings, tagged by `type` when serialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ChannelSettings {
    Email {
        email: String,
    },
    Telegram {
        chat_id: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        username: Option<String>,
    },
    Websocket {},
    Internal {},
}

impl ChannelSettings {
    pub fn channel_type(&self) -> ChannelType {
        match self {
            ChannelSettings::Email { .. } => ChannelType::Email,
            ChannelSettings::Telegram { .. } => ChannelType::Telegram,
            ChannelSettings::Websocket {} => ChannelType::Websocket,
            ChannelSettings::Internal {} => ChannelType::Internal,
        }
    }
}

/// A channel carries either a pending verification token or the time it was verified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verification {
    Pending { token: String },
    Verified { at: DateTime<Utc> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub id: i64,
    pub created_by: i64,
    pub settings: ChannelSettings,
    pub created_at: DateTime<Utc>,
    pub verification: Verification,
}

impl Channel {
    pub fn channel_type(&self) -> ChannelType {
        self.settings.channel_type()
    }

    /// Only verified channels receive deliveries.
    pub fn is_verified(&self) -> bool {
        matches!(self.verification, Verification::Verified { .. })
    }

    pub fn verified_at(&self) -> Option<DateTime<Utc>> {
        match self.verification {
            Verification::Verified { at } => Some(at),
            Verification::Pending { .. } => None,
        }
    }
}

/// One stored channel as read for a fan-out.
///
/// A row that no longer decodes is reported by id instead of failing the
/// whole read, so the remaining channels still get their delivery.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelRecord {
    Valid(Channel),
    Undecodable { id: i64, reason: String },
}

impl ChannelRecord {
    pub fn id(&self) -> i64 {
        match self {
            ChannelRecord::Valid(channel) => channel.id,
            ChannelRecord::Undecodable { id, .. } => *id,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewChannel {
    pub created_by: i64,
    pub settings: ChannelSettings,
    pub verification: Verification,
}

/// Per-user ceilings. `None` means unlimited.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UserLimits {
    pub user_id: i64,
    pub email_channel_count: Option<u32>,
    pub telegram_channel_count: Option<u32>,
    pub active_reminder_count: Option<u32>,
    pub monthly_sent_reminder_count: Option<u32>,
    /// Compared against [`Every::per_day_count`]
    pub reminder_every_per_day_count: Option<f64>,
}

impl UserLimits {
    pub fn unlimited(user_id: i64) -> Self {
        Self {
            user_id,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Validate)]
pub struct NewUser {
    #[validate(email)]
    pub email: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub user_id: i64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Input for creating a reminder on behalf of a user
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateReminder {
    pub at: DateTime<Utc>,
    #[serde(default)]
    pub every: Option<Every>,
    #[validate(length(min = 1, max = 4096))]
    pub body: String,
    #[validate(length(min = 1, max = 16))]
    pub channel_ids: Vec<i64>,
}

/// Partial update. `every: Some(None)` removes the recurrence.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateReminder {
    pub at: Option<DateTime<Utc>>,
    pub every: Option<Option<Every>>,
    #[validate(length(min = 1, max = 4096))]
    pub body: Option<String>,
    #[validate(length(min = 1, max = 16))]
    pub channel_ids: Option<Vec<i64>>,
}

impl UpdateReminder {
    pub fn is_empty(&self) -> bool {
        self.at.is_none() && self.every.is_none() && self.body.is_none() && self.channel_ids.is_none()
    }
}

/// Remove duplicate ids, keeping the first occurrence.
pub fn dedup_channel_ids(ids: &[i64]) -> Vec<i64> {
    let mut seen = std::collections::HashSet::with_capacity(ids.len());
    ids.iter().copied().filter(|id| seen.insert(*id)).collect()
}
