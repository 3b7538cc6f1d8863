//! In-memory unit of work (for development/testing)
//!
//! Transactions are serialized: `begin` takes an owned lock on the whole store
//! and works on a copy of it, which `commit` writes back in one step. Never
//! call `begin` again while holding a context on the same task.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

use crate::entity::channel;
use crate::error::{ReminderError, ReminderResult};
use crate::models::{
    Channel, ChannelRecord, NewChannel, NewReminder, NewUser, Reminder, ReminderStatus,
    ScheduleParams, Session, StatusChange, User, UserLimits,
};
use crate::repository::{
    ChannelRepository, LimitsRepository, ReminderRepository, SessionRepository, UnitOfWork,
    UowContext, UserRepository,
};

#[derive(Debug, Clone, Default)]
struct Store {
    last_reminder_id: i64,
    last_channel_id: i64,
    last_user_id: i64,
    reminders: BTreeMap<i64, Reminder>,
    /// Stored as rows and decoded on read, as the database does
    channels: BTreeMap<i64, channel::Model>,
    limits: HashMap<i64, UserLimits>,
    users: BTreeMap<i64, User>,
    sessions: HashMap<Uuid, Session>,
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryUnitOfWork {
    store: Arc<tokio::sync::Mutex<Store>>,
}

impl InMemoryUnitOfWork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed reminders, ordered by id.
    pub async fn all_reminders(&self) -> Vec<Reminder> {
        self.store.lock().await.reminders.values().cloned().collect()
    }

    /// Store a channel row as is, bypassing encoding.
    #[cfg(test)]
    pub(crate) async fn insert_channel_row(&self, row: channel::Model) {
        let mut store = self.store.lock().await;
        store.last_channel_id = store.last_channel_id.max(row.id);
        store.channels.insert(row.id, row);
    }
}

#[async_trait]
impl UnitOfWork for InMemoryUnitOfWork {
    async fn begin(&self) -> ReminderResult<Box<dyn UowContext>> {
        let guard = self.store.clone().lock_owned().await;
        let working = Mutex::new(guard.clone());
        Ok(Box::new(InMemoryUowContext { guard, working }))
    }
}

pub struct InMemoryUowContext {
    guard: OwnedMutexGuard<Store>,
    working: Mutex<Store>,
}

#[async_trait]
impl UowContext for InMemoryUowContext {
    fn reminders(&self) -> Box<dyn ReminderRepository + '_> {
        Box::new(Scoped(&self.working))
    }

    fn channels(&self) -> Box<dyn ChannelRepository + '_> {
        Box::new(Scoped(&self.working))
    }

    fn limits(&self) -> Box<dyn LimitsRepository + '_> {
        Box::new(Scoped(&self.working))
    }

    fn users(&self) -> Box<dyn UserRepository + '_> {
        Box::new(Scoped(&self.working))
    }

    fn sessions(&self) -> Box<dyn SessionRepository + '_> {
        Box::new(Scoped(&self.working))
    }

    async fn commit(self: Box<Self>) -> ReminderResult<()> {
        let InMemoryUowContext { mut guard, working } = *self;
        *guard = working.into_inner().unwrap_or_else(PoisonError::into_inner);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> ReminderResult<()> {
        Ok(())
    }
}

/// Repository view over a transaction's working copy.
struct Scoped<'a>(&'a Mutex<Store>);

impl Scoped<'_> {
    fn with<R>(&self, f: impl FnOnce(&mut Store) -> R) -> R {
        let mut store = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut store)
    }
}

#[async_trait]
impl ReminderRepository for Scoped<'_> {
    async fn create(&self, input: NewReminder) -> ReminderResult<Reminder> {
        Ok(self.with(|store| {
            store.last_reminder_id += 1;
            let reminder = Reminder {
                id: store.last_reminder_id,
                created_by: input.created_by,
                at: input.at,
                every: input.every,
                body: input.body,
                status: input.status,
                created_at: input.created_at,
                scheduled_at: input.scheduled_at,
                sent_at: None,
                canceled_at: None,
                channel_ids: input.channel_ids,
            };
            store.reminders.insert(reminder.id, reminder.clone());
            reminder
        }))
    }

    async fn get(&self, id: i64) -> ReminderResult<Option<Reminder>> {
        Ok(self.with(|store| store.reminders.get(&id).cloned()))
    }

    async fn lock(&self, id: i64) -> ReminderResult<Option<Reminder>> {
        ReminderRepository::get(self, id).await
    }

    async fn update_status(&self, id: i64, change: StatusChange) -> ReminderResult<Reminder> {
        self.with(|store| {
            let reminder = store
                .reminders
                .get_mut(&id)
                .ok_or(ReminderError::NotFound(id))?;
            change.apply(reminder);
            Ok(reminder.clone())
        })
    }

    async fn update(&self, reminder: &Reminder) -> ReminderResult<Reminder> {
        self.with(|store| {
            let slot = store
                .reminders
                .get_mut(&reminder.id)
                .ok_or(ReminderError::NotFound(reminder.id))?;
            *slot = reminder.clone();
            Ok(reminder.clone())
        })
    }

    async fn delete(&self, id: i64) -> ReminderResult<bool> {
        Ok(self.with(|store| store.reminders.remove(&id).is_some()))
    }

    async fn schedule(&self, params: ScheduleParams) -> ReminderResult<Vec<Reminder>> {
        let mut promoted = self.with(|store| {
            store
                .reminders
                .values_mut()
                .filter(|r| r.status == ReminderStatus::Created && r.at < params.at_before)
                .map(|r| {
                    StatusChange::scheduled(params.scheduled_at).apply(r);
                    r.clone()
                })
                .collect::<Vec<_>>()
        });
        promoted.sort_by_key(|r| (r.at, r.id));
        Ok(promoted)
    }

    async fn count_sent_since(&self, user_id: i64, since: DateTime<Utc>) -> ReminderResult<u64> {
        Ok(self.with(|store| {
            store
                .reminders
                .values()
                .filter(|r| {
                    r.created_by == user_id
                        && r.status == ReminderStatus::SentSuccess
                        && r.sent_at.is_some_and(|at| at >= since)
                })
                .count() as u64
        }))
    }

    async fn count_active(&self, user_id: i64) -> ReminderResult<u64> {
        Ok(self.with(|store| {
            store
                .reminders
                .values()
                .filter(|r| r.created_by == user_id && r.is_active())
                .count() as u64
        }))
    }

    async fn list_by_user(&self, user_id: i64) -> ReminderResult<Vec<Reminder>> {
        let mut reminders = self.with(|store| {
            store
                .reminders
                .values()
                .filter(|r| r.created_by == user_id)
                .cloned()
                .collect::<Vec<_>>()
        });
        reminders.sort_by_key(|r| (r.at, r.id));
        Ok(reminders)
    }

    async fn channel_ids(&self, id: i64) -> ReminderResult<Vec<i64>> {
        Ok(self.with(|store| {
            store
                .reminders
                .get(&id)
                .map(|r| r.channel_ids.clone())
                .unwrap_or_default()
        }))
    }
}

#[async_trait]
impl ChannelRepository for Scoped<'_> {
    async fn create(&self, input: NewChannel) -> ReminderResult<Channel> {
        let settings = serde_json::to_value(&input.settings)?;
        let (verification_token, verified_at) =
            channel::verification_columns(&input.verification);
        let row = self.with(|store| {
            store.last_channel_id += 1;
            let row = channel::Model {
                id: store.last_channel_id,
                created_by: input.created_by,
                channel_type: input.settings.channel_type(),
                settings,
                created_at: Utc::now(),
                verification_token,
                verified_at,
            };
            store.channels.insert(row.id, row.clone());
            row
        });
        row.try_into()
    }

    async fn get(&self, id: i64) -> ReminderResult<Option<Channel>> {
        self.with(|store| store.channels.get(&id).cloned())
            .map(Channel::try_from)
            .transpose()
    }

    async fn read(&self, ids: &[i64]) -> ReminderResult<Vec<ChannelRecord>> {
        Ok(self.with(|store| {
            ids.iter()
                .filter_map(|id| store.channels.get(id).cloned())
                .map(ChannelRecord::from)
                .collect()
        }))
    }
}

#[async_trait]
impl LimitsRepository for Scoped<'_> {
    async fn get_user_limits(&self, user_id: i64) -> ReminderResult<UserLimits> {
        Ok(self.with(|store| {
            store
                .limits
                .get(&user_id)
                .cloned()
                .unwrap_or_else(|| UserLimits::unlimited(user_id))
        }))
    }

    async fn get_user_limits_with_lock(&self, user_id: i64) -> ReminderResult<UserLimits> {
        self.get_user_limits(user_id).await
    }

    async fn set_user_limits(&self, limits: &UserLimits) -> ReminderResult<()> {
        self.with(|store| store.limits.insert(limits.user_id, limits.clone()));
        Ok(())
    }
}

#[async_trait]
impl UserRepository for Scoped<'_> {
    async fn create(&self, input: NewUser) -> ReminderResult<User> {
        self.with(|store| {
            if store.users.values().any(|u| u.email == input.email) {
                return Err(ReminderError::Validation(format!(
                    "email {} is already registered",
                    input.email
                )));
            }
            store.last_user_id += 1;
            let user = User {
                id: store.last_user_id,
                email: input.email,
                name: input.name,
                created_at: Utc::now(),
            };
            store.users.insert(user.id, user.clone());
            Ok(user)
        })
    }

    async fn get(&self, id: i64) -> ReminderResult<Option<User>> {
        Ok(self.with(|store| store.users.get(&id).cloned()))
    }
}

#[async_trait]
impl SessionRepository for Scoped<'_> {
    async fn create(&self, user_id: i64, expires_at: DateTime<Utc>) -> ReminderResult<Session> {
        Ok(self.with(|store| {
            let session = Session {
                id: Uuid::now_v7(),
                user_id,
                created_at: Utc::now(),
                expires_at,
            };
            store.sessions.insert(session.id, session.clone());
            session
        }))
    }

    async fn get(&self, id: Uuid) -> ReminderResult<Option<Session>> {
        Ok(self.with(|store| store.sessions.get(&id).cloned()))
    }

    async fn delete(&self, id: Uuid) -> ReminderResult<bool> {
        Ok(self.with(|store| store.sessions.remove(&id).is_some()))
    }
}
