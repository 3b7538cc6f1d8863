//! PostgreSQL plumbing shared by the reminder services.
//!
//! Connection pool configuration from the environment, connecting with
//! bounded backoff, running a `MigratorTrait` and a cheap liveness probe.
//!
//! ```ignore
//! use core_config::FromEnv;
//! use database::postgres::{self, PostgresConfig};
//!
//! let config = PostgresConfig::from_env()?;
//! let db = postgres::connect_with_retry(config, None).await?;
//! postgres::run_migrations::<migration::Migrator>(&db, "reminders").await?;
//! ```

pub mod error;
pub mod postgres;
pub mod retry;

pub use error::{DatabaseError, DatabaseResult};
pub use retry::{RetryConfig, retry_with_backoff};
