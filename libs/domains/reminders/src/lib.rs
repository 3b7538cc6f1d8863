//! Reminders Domain
//!
//! Lifecycle and delivery of time-based reminders.
//!
//! # Lifecycle
//!
//! ```text
//!            sweep / create              broker delay
//! Created ──────────────────▶ Scheduled ─────────────▶ Prepare
//!                                                         │
//!                    ┌──────────────────┬─────────────────┤
//!                    ▼                  ▼                 ▼
//!           SentLimitExceeded       Canceled           Sending ──▶ Send ──▶ SentSuccess
//!                                   (stale)                               └▶ SentError
//! ```
//!
//! A recurring reminder gets its next occurrence in the same unit of work
//! that moves it out of `Scheduled`, whatever the outcome.
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use domain_reminders::{
//!     ChannelDispatcher, InMemoryUnitOfWork, Pipeline, PushHub, RecordingPublisher,
//!     ReminderService, ReminderSettings, SweepScheduler, system_clock,
//! };
//!
//! let uow = Arc::new(InMemoryUnitOfWork::new());
//! let publisher = Arc::new(RecordingPublisher::new(system_clock()));
//! let settings = ReminderSettings::default();
//!
//! let service = ReminderService::new(uow.clone(), publisher.clone(), settings);
//! let scheduler = SweepScheduler::new(uow.clone(), publisher.clone(), settings);
//! let dispatcher = ChannelDispatcher::new().with_push(Arc::new(PushHub::default()));
//! let pipeline = Pipeline::new(uow, publisher, dispatcher, settings);
//! ```

pub mod cancel;
pub mod clock;
pub mod config;
pub mod consumer;
pub mod entity;
pub mod error;
pub mod every;
pub mod memory;
mod metrics;
pub mod models;
pub mod pipeline;
pub mod postgres;
pub mod publisher;
pub mod repository;
pub mod scheduler;
pub mod senders;
pub mod service;

// Re-export commonly used types
pub use clock::{Clock, ManualClock, fixed_clock, system_clock};
pub use config::ReminderSettings;
pub use consumer::{Disposition, ReadyConsumer};
pub use error::{ErrorKind, ReminderError, ReminderResult};
pub use every::{Every, EveryError, Period};
pub use memory::InMemoryUnitOfWork;
pub use models::{
    Channel, ChannelRecord, ChannelSettings, ChannelType, CreateReminder, NewChannel,
    NewReminder, NewUser, Reminder, ReminderEnvelope, ReminderStatus, ScheduleParams, Session,
    StatusChange, UpdateReminder, User, UserLimits, Verification,
};
pub use pipeline::{Pipeline, PipelineReport, PrepareOutcome, Prepared, SendReport};
pub use postgres::PgUnitOfWork;
pub use publisher::{AmqpReminderPublisher, RecordingPublisher, ReminderPublisher};
pub use repository::{
    ChannelRepository, LimitsRepository, ReminderRepository, SessionRepository, UnitOfWork,
    UowContext, UserRepository,
};
pub use scheduler::SweepScheduler;
pub use senders::{
    ChannelDispatcher, ChannelSender, EmailSender, PushHub, PushMessage, SendError, SmtpConfig,
    TelegramConfig, TelegramSender,
};
pub use service::ReminderService;
