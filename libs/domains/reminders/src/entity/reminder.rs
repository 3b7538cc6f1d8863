use sea_orm::ActiveValue::{NotSet, Set};
use sea_orm::entity::prelude::*;

use crate::every::{Every, Period};
use crate::models::{NewReminder, Reminder, ReminderStatus};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "reminders")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub created_by: i64,
    pub at: DateTimeUtc,
    pub every_count: Option<i32>,
    pub every_period: Option<Period>,
    #[sea_orm(column_type = "Text")]
    pub body: String,
    pub status: ReminderStatus,
    pub created_at: DateTimeUtc,
    pub scheduled_at: Option<DateTimeUtc>,
    pub sent_at: Option<DateTimeUtc>,
    pub canceled_at: Option<DateTimeUtc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::reminder_channel::Entity")]
    ReminderChannel,
}

impl Related<super::reminder_channel::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ReminderChannel.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Both columns are set together or not at all.
    pub fn every(&self) -> Option<Every> {
        match (self.every_count, self.every_period) {
            (Some(count), Some(period)) => Some(Every::new_unchecked(count.max(0) as u32, period)),
            _ => None,
        }
    }

    pub fn into_reminder(self, channel_ids: Vec<i64>) -> Reminder {
        Reminder {
            every: self.every(),
            id: self.id,
            created_by: self.created_by,
            at: self.at,
            body: self.body,
            status: self.status,
            created_at: self.created_at,
            scheduled_at: self.scheduled_at,
            sent_at: self.sent_at,
            canceled_at: self.canceled_at,
            channel_ids,
        }
    }
}

pub(crate) fn every_columns(every: Option<Every>) -> (Option<i32>, Option<Period>) {
    match every {
        Some(every) => (Some(every.count as i32), Some(every.period)),
        None => (None, None),
    }
}

impl ActiveModel {
    pub fn from_new(input: &NewReminder) -> Self {
        let (every_count, every_period) = every_columns(input.every);
        ActiveModel {
            id: NotSet,
            created_by: Set(input.created_by),
            at: Set(input.at),
            every_count: Set(every_count),
            every_period: Set(every_period),
            body: Set(input.body.clone()),
            status: Set(input.status),
            created_at: Set(input.created_at),
            scheduled_at: Set(input.scheduled_at),
            sent_at: Set(None),
            canceled_at: Set(None),
        }
    }

    /// Full overwrite of the mutable columns of an existing row.
    pub fn from_reminder(reminder: &Reminder) -> Self {
        let (every_count, every_period) = every_columns(reminder.every);
        ActiveModel {
            id: sea_orm::ActiveValue::Unchanged(reminder.id),
            created_by: Set(reminder.created_by),
            at: Set(reminder.at),
            every_count: Set(every_count),
            every_period: Set(every_period),
            body: Set(reminder.body.clone()),
            status: Set(reminder.status),
            created_at: Set(reminder.created_at),
            scheduled_at: Set(reminder.scheduled_at),
            sent_at: Set(reminder.sent_at),
            canceled_at: Set(reminder.canceled_at),
        }
    }
}
