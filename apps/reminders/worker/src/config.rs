//! Worker process settings

use std::time::Duration;

use core_config::{ConfigError, FromEnv, env_duration_ms, env_parse};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    pub health_port: u16,
    pub run_migrations: bool,
    /// Pause before a failed message goes back to the queue
    pub requeue_delay: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            health_port: 8083,
            run_migrations: true,
            requeue_delay: Duration::from_secs(1),
        }
    }
}

/// Environment variables:
/// - `REMINDERS_WORKER_HEALTH_PORT`, falling back to `HEALTH_PORT` (default: 8083)
/// - `RUN_MIGRATIONS` (default: true)
/// - `REMINDERS_REQUEUE_DELAY_MS` (default: 1000)
impl FromEnv for WorkerConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let port_key = if std::env::var("REMINDERS_WORKER_HEALTH_PORT").is_ok() {
            "REMINDERS_WORKER_HEALTH_PORT"
        } else {
            "HEALTH_PORT"
        };

        Ok(Self {
            health_port: env_parse(port_key, defaults.health_port)?,
            run_migrations: env_parse("RUN_MIGRATIONS", defaults.run_migrations)?,
            requeue_delay: env_duration_ms("REMINDERS_REQUEUE_DELAY_MS", defaults.requeue_delay)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VARS: [&str; 4] = [
        "REMINDERS_WORKER_HEALTH_PORT",
        "HEALTH_PORT",
        "RUN_MIGRATIONS",
        "REMINDERS_REQUEUE_DELAY_MS",
    ];

    #[test]
    fn defaults() {
        temp_env::with_vars_unset(VARS, || {
            assert_eq!(WorkerConfig::from_env().unwrap(), WorkerConfig::default());
        });
    }

    #[test]
    fn worker_port_wins_over_generic_port() {
        temp_env::with_vars(
            [
                ("REMINDERS_WORKER_HEALTH_PORT", Some("9100")),
                ("HEALTH_PORT", Some("9200")),
                ("RUN_MIGRATIONS", Some("false")),
            ],
            || {
                let config = WorkerConfig::from_env().unwrap();
                assert_eq!(config.health_port, 9100);
                assert!(!config.run_migrations);
            },
        );
    }

    #[test]
    fn generic_port_is_used_as_fallback() {
        temp_env::with_vars(
            [
                ("REMINDERS_WORKER_HEALTH_PORT", None),
                ("HEALTH_PORT", Some("9200")),
            ],
            || assert_eq!(WorkerConfig::from_env().unwrap().health_port, 9200),
        );
    }

    #[test]
    fn requeue_delay_is_read_in_milliseconds() {
        temp_env::with_var("REMINDERS_REQUEUE_DELAY_MS", Some("250"), || {
            assert_eq!(
                WorkerConfig::from_env().unwrap().requeue_delay,
                Duration::from_millis(250)
            );
        });
        temp_env::with_var("REMINDERS_REQUEUE_DELAY_MS", Some("-1"), || {
            assert!(WorkerConfig::from_env().is_err());
        });
    }

    #[test]
    fn bad_port_is_rejected() {
        temp_env::with_vars(
            [
                ("REMINDERS_WORKER_HEALTH_PORT", Some("not-a-port")),
                ("HEALTH_PORT", None),
            ],
            || assert!(WorkerConfig::from_env().is_err()),
        );
    }
}
