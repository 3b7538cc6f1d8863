//! PostgreSQL connection management

mod config;
mod connect;
mod health;

pub use config::PostgresConfig;
pub use connect::{connect, connect_with_retry, run_migrations};
pub use health::{HealthStatus, check_health, check_health_detailed};

pub use sea_orm::{DatabaseConnection, DbErr};
pub use sea_orm_migration::MigratorTrait;
