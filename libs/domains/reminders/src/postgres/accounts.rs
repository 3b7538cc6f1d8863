use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::ActiveValue::{NotSet, Set};
use sea_orm::sea_query::OnConflict;
use sea_orm::{ActiveModelTrait, DatabaseTransaction, EntityTrait, QuerySelect};
use uuid::Uuid;

use crate::entity::{session, user, user_limits};
use crate::error::ReminderResult;
use crate::models::{NewUser, Session, User, UserLimits};
use crate::repository::{LimitsRepository, SessionRepository, UserRepository};

pub struct PgLimitsRepository<'a> {
    txn: &'a DatabaseTransaction,
}

impl<'a> PgLimitsRepository<'a> {
    pub fn new(txn: &'a DatabaseTransaction) -> Self {
        Self { txn }
    }
}

#[async_trait]
impl LimitsRepository for PgLimitsRepository<'_> {
    async fn get_user_limits(&self, user_id: i64) -> ReminderResult<UserLimits> {
        let limits = user_limits::Entity::find_by_id(user_id)
            .one(self.txn)
            .await?
            .map(UserLimits::from)
            .unwrap_or_else(|| UserLimits::unlimited(user_id));
        Ok(limits)
    }

    async fn get_user_limits_with_lock(&self, user_id: i64) -> ReminderResult<UserLimits> {
        // The users row always exists, unlike the limits row
        user::Entity::find_by_id(user_id)
            .lock_exclusive()
            .one(self.txn)
            .await?;
        self.get_user_limits(user_id).await
    }

    async fn set_user_limits(&self, limits: &UserLimits) -> ReminderResult<()> {
        user_limits::Entity::insert(user_limits::ActiveModel::from(limits))
            .on_conflict(
                OnConflict::column(user_limits::Column::UserId)
                    .update_columns([
                        user_limits::Column::EmailChannelCount,
                        user_limits::Column::TelegramChannelCount,
                        user_limits::Column::ActiveReminderCount,
                        user_limits::Column::MonthlySentReminderCount,
                        user_limits::Column::ReminderEveryPerDayCount,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(self.txn)
            .await?;
        Ok(())
    }
}

pub struct PgUserRepository<'a> {
    txn: &'a DatabaseTransaction,
}

impl<'a> PgUserRepository<'a> {
    pub fn new(txn: &'a DatabaseTransaction) -> Self {
        Self { txn }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository<'_> {
    async fn create(&self, input: NewUser) -> ReminderResult<User> {
        let model = user::ActiveModel {
            id: NotSet,
            email: Set(input.email),
            name: Set(input.name),
            created_at: Set(Utc::now()),
        }
        .insert(self.txn)
        .await?;
        Ok(model.into())
    }

    async fn get(&self, id: i64) -> ReminderResult<Option<User>> {
        Ok(user::Entity::find_by_id(id)
            .one(self.txn)
            .await?
            .map(User::from))
    }
}

pub struct PgSessionRepository<'a> {
    txn: &'a DatabaseTransaction,
}

impl<'a> PgSessionRepository<'a> {
    pub fn new(txn: &'a DatabaseTransaction) -> Self {
        Self { txn }
    }
}

#[async_trait]
impl SessionRepository for PgSessionRepository<'_> {
    async fn create(&self, user_id: i64, expires_at: DateTime<Utc>) -> ReminderResult<Session> {
        let session = Session {
            id: Uuid::now_v7(),
            user_id,
            created_at: Utc::now(),
            expires_at,
        };
        session::ActiveModel::from(&session).insert(self.txn).await?;
        Ok(session)
    }

    async fn get(&self, id: Uuid) -> ReminderResult<Option<Session>> {
        Ok(session::Entity::find_by_id(id)
            .one(self.txn)
            .await?
            .map(Session::from))
    }

    async fn delete(&self, id: Uuid) -> ReminderResult<bool> {
        let result = session::Entity::delete_by_id(id).exec(self.txn).await?;
        Ok(result.rows_affected > 0)
    }
}
