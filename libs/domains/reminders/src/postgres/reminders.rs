use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::ActiveValue::{NotSet, Set, Unchanged};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseTransaction, DbBackend, DbErr, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Statement,
};

use crate::entity::{reminder, reminder_channel};
use crate::error::{ReminderError, ReminderResult};
use crate::models::{NewReminder, Reminder, ReminderStatus, ScheduleParams, StatusChange};
use crate::repository::ReminderRepository;

const SCHEDULE_SQL: &str = r#"
UPDATE reminders
SET status = 'scheduled', scheduled_at = $1
WHERE status = 'created' AND at < $2
RETURNING *
"#;

pub struct PgReminderRepository<'a> {
    txn: &'a DatabaseTransaction,
}

impl<'a> PgReminderRepository<'a> {
    pub fn new(txn: &'a DatabaseTransaction) -> Self {
        Self { txn }
    }

    async fn links_for(&self, ids: &[i64]) -> ReminderResult<HashMap<i64, Vec<i64>>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let rows = reminder_channel::Entity::find()
            .filter(reminder_channel::Column::ReminderId.is_in(ids.to_vec()))
            .order_by_asc(reminder_channel::Column::ReminderId)
            .order_by_asc(reminder_channel::Column::Position)
            .all(self.txn)
            .await?;

        let mut links: HashMap<i64, Vec<i64>> = HashMap::new();
        for row in rows {
            links.entry(row.reminder_id).or_default().push(row.channel_id);
        }
        Ok(links)
    }

    async fn with_links(&self, model: reminder::Model) -> ReminderResult<Reminder> {
        let channel_ids = self.channel_ids(model.id).await?;
        Ok(model.into_reminder(channel_ids))
    }

    async fn with_links_many(&self, models: Vec<reminder::Model>) -> ReminderResult<Vec<Reminder>> {
        let ids: Vec<i64> = models.iter().map(|m| m.id).collect();
        let mut links = self.links_for(&ids).await?;
        Ok(models
            .into_iter()
            .map(|m| {
                let channel_ids = links.remove(&m.id).unwrap_or_default();
                m.into_reminder(channel_ids)
            })
            .collect())
    }

    async fn replace_links(&self, reminder_id: i64, channel_ids: &[i64]) -> ReminderResult<()> {
        reminder_channel::Entity::delete_many()
            .filter(reminder_channel::Column::ReminderId.eq(reminder_id))
            .exec(self.txn)
            .await?;
        self.insert_links(reminder_id, channel_ids).await
    }

    async fn insert_links(&self, reminder_id: i64, channel_ids: &[i64]) -> ReminderResult<()> {
        if channel_ids.is_empty() {
            return Ok(());
        }
        reminder_channel::Entity::insert_many(reminder_channel::links(reminder_id, channel_ids))
            .exec_without_returning(self.txn)
            .await?;
        Ok(())
    }
}

fn not_updated(id: i64) -> impl FnOnce(DbErr) -> ReminderError {
    move |err| match err {
        DbErr::RecordNotUpdated => ReminderError::NotFound(id),
        other => other.into(),
    }
}

#[async_trait]
impl ReminderRepository for PgReminderRepository<'_> {
    async fn create(&self, input: NewReminder) -> ReminderResult<Reminder> {
        let model = reminder::ActiveModel::from_new(&input).insert(self.txn).await?;
        self.insert_links(model.id, &input.channel_ids).await?;

        tracing::debug!(reminder_id = model.id, status = %model.status, "Inserted reminder");
        Ok(model.into_reminder(input.channel_ids))
    }

    async fn get(&self, id: i64) -> ReminderResult<Option<Reminder>> {
        match reminder::Entity::find_by_id(id).one(self.txn).await? {
            Some(model) => Ok(Some(self.with_links(model).await?)),
            None => Ok(None),
        }
    }

    async fn lock(&self, id: i64) -> ReminderResult<Option<Reminder>> {
        let model = reminder::Entity::find_by_id(id)
            .lock_exclusive()
            .one(self.txn)
            .await?;
        match model {
            Some(model) => Ok(Some(self.with_links(model).await?)),
            None => Ok(None),
        }
    }

    async fn update_status(&self, id: i64, change: StatusChange) -> ReminderResult<Reminder> {
        let keep_or_set = |value: Option<DateTime<Utc>>| match value {
            Some(at) => Set(Some(at)),
            None => NotSet,
        };

        let active = reminder::ActiveModel {
            id: Unchanged(id),
            created_by: NotSet,
            at: NotSet,
            every_count: NotSet,
            every_period: NotSet,
            body: NotSet,
            status: Set(change.status),
            created_at: NotSet,
            scheduled_at: keep_or_set(change.scheduled_at),
            sent_at: keep_or_set(change.sent_at),
            canceled_at: keep_or_set(change.canceled_at),
        };
        let model = active.update(self.txn).await.map_err(not_updated(id))?;
        self.with_links(model).await
    }

    async fn update(&self, reminder: &Reminder) -> ReminderResult<Reminder> {
        let model = reminder::ActiveModel::from_reminder(reminder)
            .update(self.txn)
            .await
            .map_err(not_updated(reminder.id))?;
        self.replace_links(model.id, &reminder.channel_ids).await?;
        Ok(model.into_reminder(reminder.channel_ids.clone()))
    }

    async fn delete(&self, id: i64) -> ReminderResult<bool> {
        let result = reminder::Entity::delete_by_id(id).exec(self.txn).await?;
        Ok(result.rows_affected > 0)
    }

    async fn schedule(&self, params: ScheduleParams) -> ReminderResult<Vec<Reminder>> {
        let statement = Statement::from_sql_and_values(
            DbBackend::Postgres,
            SCHEDULE_SQL,
            [params.scheduled_at.into(), params.at_before.into()],
        );
        let mut models = reminder::Entity::find()
            .from_raw_sql(statement)
            .all(self.txn)
            .await?;
        models.sort_by_key(|m| (m.at, m.id));

        self.with_links_many(models).await
    }

    async fn count_sent_since(&self, user_id: i64, since: DateTime<Utc>) -> ReminderResult<u64> {
        let count = reminder::Entity::find()
            .filter(reminder::Column::CreatedBy.eq(user_id))
            .filter(reminder::Column::Status.eq(ReminderStatus::SentSuccess))
            .filter(reminder::Column::SentAt.gte(since))
            .count(self.txn)
            .await?;
        Ok(count)
    }

    async fn count_active(&self, user_id: i64) -> ReminderResult<u64> {
        let count = reminder::Entity::find()
            .filter(reminder::Column::CreatedBy.eq(user_id))
            .filter(reminder::Column::Status.is_in(ReminderStatus::ACTIVE))
            .count(self.txn)
            .await?;
        Ok(count)
    }

    async fn list_by_user(&self, user_id: i64) -> ReminderResult<Vec<Reminder>> {
        let models = reminder::Entity::find()
            .filter(reminder::Column::CreatedBy.eq(user_id))
            .order_by_asc(reminder::Column::At)
            .order_by_asc(reminder::Column::Id)
            .all(self.txn)
            .await?;
        self.with_links_many(models).await
    }

    async fn channel_ids(&self, id: i64) -> ReminderResult<Vec<i64>> {
        let ids = reminder_channel::Entity::find()
            .select_only()
            .column(reminder_channel::Column::ChannelId)
            .filter(reminder_channel::Column::ReminderId.eq(id))
            .order_by_asc(reminder_channel::Column::Position)
            .into_tuple::<i64>()
            .all(self.txn)
            .await?;
        Ok(ids)
    }
}
