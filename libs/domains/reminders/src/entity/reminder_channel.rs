use sea_orm::entity::prelude::*;

/// Link between a reminder and one of its delivery channels.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "reminder_channels")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub reminder_id: i64,
    #[sea_orm(primary_key, auto_increment = false)]
    pub channel_id: i64,
    pub position: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::reminder::Entity",
        from = "Column::ReminderId",
        to = "super::reminder::Column::Id",
        on_delete = "Cascade"
    )]
    Reminder,
}

impl Related<super::reminder::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Reminder.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

pub(crate) fn links(reminder_id: i64, channel_ids: &[i64]) -> Vec<ActiveModel> {
    channel_ids
        .iter()
        .enumerate()
        .map(|(position, channel_id)| ActiveModel {
            reminder_id: sea_orm::ActiveValue::Set(reminder_id),
            channel_id: sea_orm::ActiveValue::Set(*channel_id),
            position: sea_orm::ActiveValue::Set(position as i32),
        })
        .collect()
}
