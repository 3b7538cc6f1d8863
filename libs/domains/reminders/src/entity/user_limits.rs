use sea_orm::ActiveValue::Set;
use sea_orm::entity::prelude::*;

use crate::models::UserLimits;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "user_limits")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub user_id: i64,
    pub email_channel_count: Option<i32>,
    pub telegram_channel_count: Option<i32>,
    pub active_reminder_count: Option<i32>,
    pub monthly_sent_reminder_count: Option<i32>,
    pub reminder_every_per_day_count: Option<f64>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

fn to_u32(value: Option<i32>) -> Option<u32> {
    value.map(|v| v.max(0) as u32)
}

fn to_i32(value: Option<u32>) -> Option<i32> {
    value.map(|v| i32::try_from(v).unwrap_or(i32::MAX))
}

impl From<Model> for UserLimits {
    fn from(model: Model) -> Self {
        Self {
            user_id: model.user_id,
            email_channel_count: to_u32(model.email_channel_count),
            telegram_channel_count: to_u32(model.telegram_channel_count),
            active_reminder_count: to_u32(model.active_reminder_count),
            monthly_sent_reminder_count: to_u32(model.monthly_sent_reminder_count),
            reminder_every_per_day_count: model.reminder_every_per_day_count,
        }
    }
}

impl From<&UserLimits> for ActiveModel {
    fn from(limits: &UserLimits) -> Self {
        ActiveModel {
            user_id: Set(limits.user_id),
            email_channel_count: Set(to_i32(limits.email_channel_count)),
            telegram_channel_count: Set(to_i32(limits.telegram_channel_count)),
            active_reminder_count: Set(to_i32(limits.active_reminder_count)),
            monthly_sent_reminder_count: Set(to_i32(limits.monthly_sent_reminder_count)),
            reminder_every_per_day_count: Set(limits.reminder_every_per_day_count),
        }
    }
}
