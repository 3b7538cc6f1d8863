//! PostgreSQL unit of work over sea-orm transactions

mod accounts;
mod channels;
mod reminders;

use async_trait::async_trait;
use sea_orm::{DatabaseConnection, DatabaseTransaction, TransactionTrait};

use crate::error::ReminderResult;
use crate::repository::{
    ChannelRepository, LimitsRepository, ReminderRepository, SessionRepository, UnitOfWork,
    UowContext, UserRepository,
};

pub use accounts::{PgLimitsRepository, PgSessionRepository, PgUserRepository};
pub use channels::PgChannelRepository;
pub use reminders::PgReminderRepository;

#[derive(Clone)]
pub struct PgUnitOfWork {
    db: DatabaseConnection,
}

impl PgUnitOfWork {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn begin(&self) -> ReminderResult<Box<dyn UowContext>> {
        let txn = self.db.begin().await?;
        Ok(Box::new(PgUowContext { txn }))
    }
}

/// Dropping the transaction without committing rolls it back.
pub struct PgUowContext {
    txn: DatabaseTransaction,
}

#[async_trait]
impl UowContext for PgUowContext {
    fn reminders(&self) -> Box<dyn ReminderRepository + '_> {
        Box::new(PgReminderRepository::new(&self.txn))
    }

    fn channels(&self) -> Box<dyn ChannelRepository + '_> {
        Box::new(PgChannelRepository::new(&self.txn))
    }

    fn limits(&self) -> Box<dyn LimitsRepository + '_> {
        Box::new(PgLimitsRepository::new(&self.txn))
    }

    fn users(&self) -> Box<dyn UserRepository + '_> {
        Box::new(PgUserRepository::new(&self.txn))
    }

    fn sessions(&self) -> Box<dyn SessionRepository + '_> {
        Box::new(PgSessionRepository::new(&self.txn))
    }

    async fn commit(self: Box<Self>) -> ReminderResult<()> {
        self.txn.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> ReminderResult<()> {
        self.txn.rollback().await?;
        Ok(())
    }
}
