//! Recurrence rule: "every N <unit>".
//!
//! Validation and scheduling decisions use a *nominal* length per unit where a
//! month counts as 31 days and a year as 372 days. Advancing a timestamp uses
//! real calendar arithmetic instead, so the two intentionally disagree for
//! months and years.

use chrono::{DateTime, Days, Months, TimeDelta, Utc};
use sea_orm::sea_query::StringLen;
use sea_orm::{DeriveActiveEnum, EnumIter};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use strum::{Display, EnumString};
use thiserror::Error;

const MINUTE_SECS: i64 = 60;
const HOUR_SECS: i64 = 60 * MINUTE_SECS;
const DAY_SECS: i64 = 24 * HOUR_SECS;

/// Shortest allowed nominal duration
pub const MIN_DURATION_SECS: i64 = MINUTE_SECS;
/// Longest allowed nominal duration (one nominal year)
pub const MAX_DURATION_SECS: i64 = 372 * DAY_SECS;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    DeriveActiveEnum,
    EnumIter,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(8))")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Period {
    #[sea_orm(string_value = "minute")]
    Minute,
    #[sea_orm(string_value = "hour")]
    Hour,
    #[sea_orm(string_value = "day")]
    Day,
    #[sea_orm(string_value = "week")]
    Week,
    #[sea_orm(string_value = "month")]
    Month,
    #[sea_orm(string_value = "year")]
    Year,
}

impl Period {
    /// Bounding length of one unit, not its calendar length.
    pub fn nominal_secs(self) -> i64 {
        match self {
            Period::Minute => MINUTE_SECS,
            Period::Hour => HOUR_SECS,
            Period::Day => DAY_SECS,
            Period::Week => 7 * DAY_SECS,
            Period::Month => 31 * DAY_SECS,
            Period::Year => 372 * DAY_SECS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EveryError {
    #[error("recurrence {0} must be between 1 minute and 1 year")]
    OutOfRange(Every),

    #[error("cannot parse recurrence '{0}'")]
    Parse(String),

    #[error("advancing {every} from {from} leaves the supported calendar range")]
    Overflow { every: Every, from: DateTime<Utc> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Every {
    pub count: u32,
    pub period: Period,
}

impl Every {
    /// Build a rule and validate it.
    pub fn new(count: u32, period: Period) -> Result<Self, EveryError> {
        let every = Self::new_unchecked(count, period);
        every.validate()?;
        Ok(every)
    }

    /// Build a rule without validating it, e.g. when loading stored rows.
    pub const fn new_unchecked(count: u32, period: Period) -> Self {
        Self { count, period }
    }

    pub fn validate(&self) -> Result<(), EveryError> {
        let secs = self.nominal_secs();
        if (MIN_DURATION_SECS..=MAX_DURATION_SECS).contains(&secs) {
            Ok(())
        } else {
            Err(EveryError::OutOfRange(*self))
        }
    }

    fn nominal_secs(&self) -> i64 {
        i64::from(self.count) * self.period.nominal_secs()
    }

    /// Nominal length of one interval.
    pub fn total_duration(&self) -> TimeDelta {
        TimeDelta::seconds(self.nominal_secs())
    }

    /// How many times per day this rule fires, by nominal length.
    pub fn per_day_count(&self) -> f64 {
        let secs = self.nominal_secs();
        if secs == 0 {
            return f64::INFINITY;
        }
        DAY_SECS as f64 / secs as f64
    }

    /// The next fire time after `from`.
    ///
    /// Minutes, hours and days add a fixed duration. Weeks add calendar days.
    /// Months and years add calendar months and clamp the day of month, so
    /// Jan 31 + 1 month is the last day of February.
    pub fn next_from(&self, from: DateTime<Utc>) -> Result<DateTime<Utc>, EveryError> {
        let n = self.count;
        let next = match self.period {
            Period::Minute | Period::Hour | Period::Day => {
                from.checked_add_signed(self.total_duration())
            }
            Period::Week => from.checked_add_days(Days::new(7 * u64::from(n))),
            Period::Month => from.checked_add_months(Months::new(n)),
            Period::Year => n
                .checked_mul(12)
                .and_then(|months| from.checked_add_months(Months::new(months))),
        };

        next.ok_or(EveryError::Overflow { every: *self, from })
    }
}

impl fmt::Display for Every {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let plural = if self.count == 1 { "" } else { "s" };
        write!(f, "every {} {}{}", self.count, self.period, plural)
    }
}

/// Parses the compact forms produced by `Display`, plus `every <unit>`.
impl FromStr for Every {
    type Err = EveryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse_err = || EveryError::Parse(s.to_string());

        let normalized = s.trim().to_ascii_lowercase();
        let rest = normalized.strip_prefix("every").unwrap_or(&normalized);
        let parts: Vec<&str> = rest.split_whitespace().collect();

        let (count, unit) = match parts.as_slice() {
            [unit] => (1, *unit),
            [count, unit] => (count.parse::<u32>().map_err(|_| parse_err())?, *unit),
            _ => return Err(parse_err()),
        };

        let unit = unit.strip_suffix('s').unwrap_or(unit);
        let period = Period::from_str(unit).map_err(|_| parse_err())?;

        Every::new(count, period)
    }
}
