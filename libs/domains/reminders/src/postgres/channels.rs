use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseTransaction, EntityTrait, QueryFilter};

use crate::entity::channel;
use crate::error::ReminderResult;
use crate::models::{Channel, ChannelRecord, NewChannel};
use crate::repository::ChannelRepository;

pub struct PgChannelRepository<'a> {
    txn: &'a DatabaseTransaction,
}

impl<'a> PgChannelRepository<'a> {
    pub fn new(txn: &'a DatabaseTransaction) -> Self {
        Self { txn }
    }
}

#[async_trait]
impl ChannelRepository for PgChannelRepository<'_> {
    async fn create(&self, input: NewChannel) -> ReminderResult<Channel> {
        let model = channel::ActiveModel::from_new(&input, Utc::now())?
            .insert(self.txn)
            .await?;
        tracing::debug!(channel_id = model.id, channel_type = %model.channel_type, "Inserted channel");
        model.try_into()
    }

    async fn get(&self, id: i64) -> ReminderResult<Option<Channel>> {
        channel::Entity::find_by_id(id)
            .one(self.txn)
            .await?
            .map(Channel::try_from)
            .transpose()
    }

    async fn read(&self, ids: &[i64]) -> ReminderResult<Vec<ChannelRecord>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let models = channel::Entity::find()
            .filter(channel::Column::Id.is_in(ids.to_vec()))
            .all(self.txn)
            .await?;

        let mut records: Vec<ChannelRecord> =
            models.into_iter().map(ChannelRecord::from).collect();
        records.sort_by_key(|r| ids.iter().position(|id| *id == r.id()));
        Ok(records)
    }
}
