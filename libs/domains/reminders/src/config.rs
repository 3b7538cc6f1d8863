use chrono::TimeDelta;
use core_config::{ConfigError, FromEnv, env_duration_secs};
use std::time::Duration;

/// Timing knobs of the scheduling pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReminderSettings {
    /// Reminders firing within this window are published straight away
    pub horizon: TimeDelta,
    pub sweep_interval: Duration,
    /// Reminders older than this at fire time are canceled instead of sent
    pub max_sending_delay: TimeDelta,
}

impl Default for ReminderSettings {
    fn default() -> Self {
        Self {
            horizon: TimeDelta::hours(1),
            sweep_interval: Duration::from_secs(60),
            max_sending_delay: TimeDelta::hours(1),
        }
    }
}

impl ReminderSettings {
    pub fn with_horizon(mut self, horizon: TimeDelta) -> Self {
        self.horizon = horizon;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn with_max_sending_delay(mut self, delay: TimeDelta) -> Self {
        self.max_sending_delay = delay;
        self
    }
}

fn positive(key: &str, value: Duration) -> Result<Duration, ConfigError> {
    if value.is_zero() {
        return Err(ConfigError::ParseError {
            key: key.to_string(),
            details: "must be greater than zero".to_string(),
        });
    }
    Ok(value)
}

fn to_delta(key: &str, value: Duration) -> Result<TimeDelta, ConfigError> {
    TimeDelta::from_std(positive(key, value)?).map_err(|e| ConfigError::ParseError {
        key: key.to_string(),
        details: e.to_string(),
    })
}

impl FromEnv for ReminderSettings {
    fn from_env() -> Result<Self, ConfigError> {
        let horizon = env_duration_secs("REMINDERS_HORIZON_SECS", Duration::from_secs(3600))?;
        let sweep = env_duration_secs("REMINDERS_SWEEP_INTERVAL_SECS", Duration::from_secs(60))?;
        let max_delay = env_duration_secs("REMINDERS_MAX_SENDING_DELAY_SECS", Duration::from_secs(3600))?;

        Ok(Self {
            horizon: to_delta("REMINDERS_HORIZON_SECS", horizon)?,
            sweep_interval: positive("REMINDERS_SWEEP_INTERVAL_SECS", sweep)?,
            max_sending_delay: to_delta("REMINDERS_MAX_SENDING_DELAY_SECS", max_delay)?,
        })
    }
}
