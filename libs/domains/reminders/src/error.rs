use amqp_broker::BrokerError;
use http::StatusCode;
use thiserror::Error;

use crate::every::{Every, EveryError};
use crate::models::ReminderStatus;

/// How an error should be treated by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Rule violation caused by the caller's input or the reminder's state
    Domain,
    /// A per-user limit was hit
    Quota,
    /// Database or broker failure; the unit of work was rolled back
    Infrastructure,
    /// The operation was abandoned because the process is shutting down
    Cancelled,
}

#[derive(Debug, Error)]
pub enum ReminderError {
    #[error("Reminder not found: {0}")]
    NotFound(i64),

    #[error("Channel not found: {0}")]
    ChannelNotFound(i64),

    #[error("Channel {0} is not verified")]
    ChannelNotVerified(i64),

    #[error("User {user_id} is not allowed to modify reminder {reminder_id}")]
    PermissionDenied { user_id: i64, reminder_id: i64 },

    #[error("Reminder {id} is not active (status: {status})")]
    NotActive { id: i64, status: ReminderStatus },

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error(transparent)]
    Every(#[from] EveryError),

    #[error("Active reminder limit of {limit} reached")]
    ActiveLimitExceeded { limit: u32 },

    #[error("{every} fires {per_day:.2} times per day, above the limit of {limit}")]
    FrequencyLimitExceeded { every: Every, per_day: f64, limit: f64 },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Broker error: {0}")]
    Broker(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Operation cancelled")]
    Cancelled,
}

pub type ReminderResult<T> = Result<T, ReminderError>;

impl ReminderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReminderError::NotFound(_)
            | ReminderError::ChannelNotFound(_)
            | ReminderError::ChannelNotVerified(_)
            | ReminderError::PermissionDenied { .. }
            | ReminderError::NotActive { .. }
            | ReminderError::Validation(_)
            | ReminderError::Every(_) => ErrorKind::Domain,
            ReminderError::ActiveLimitExceeded { .. }
            | ReminderError::FrequencyLimitExceeded { .. } => ErrorKind::Quota,
            ReminderError::Database(_)
            | ReminderError::Broker(_)
            | ReminderError::Serialization(_)
            | ReminderError::Internal(_) => ErrorKind::Infrastructure,
            ReminderError::Cancelled => ErrorKind::Cancelled,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind() == ErrorKind::Cancelled
    }

    pub fn is_infrastructure(&self) -> bool {
        self.kind() == ErrorKind::Infrastructure
    }

    /// Status code for an HTTP layer sitting in front of the service.
    pub fn http_status(&self) -> StatusCode {
        match self {
            ReminderError::NotFound(_) | ReminderError::ChannelNotFound(_) => StatusCode::NOT_FOUND,
            ReminderError::PermissionDenied { .. } => StatusCode::FORBIDDEN,
            ReminderError::NotActive { .. } => StatusCode::CONFLICT,
            ReminderError::ChannelNotVerified(_)
            | ReminderError::Validation(_)
            | ReminderError::Every(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ReminderError::ActiveLimitExceeded { .. }
            | ReminderError::FrequencyLimitExceeded { .. } => StatusCode::FORBIDDEN,
            ReminderError::Broker(_) | ReminderError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            ReminderError::Database(_)
            | ReminderError::Serialization(_)
            | ReminderError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<sea_orm::DbErr> for ReminderError {
    fn from(err: sea_orm::DbErr) -> Self {
        ReminderError::Database(err.to_string())
    }
}

impl From<BrokerError> for ReminderError {
    fn from(err: BrokerError) -> Self {
        ReminderError::Broker(err.to_string())
    }
}

impl From<serde_json::Error> for ReminderError {
    fn from(err: serde_json::Error) -> Self {
        ReminderError::Serialization(err.to_string())
    }
}

impl From<validator::ValidationErrors> for ReminderError {
    fn from(err: validator::ValidationErrors) -> Self {
        ReminderError::Validation(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::every::Period;

    #[test]
    fn domain_errors_map_to_4xx() {
        let errors = [
            ReminderError::NotFound(1),
            ReminderError::PermissionDenied {
                user_id: 1,
                reminder_id: 2,
            },
            ReminderError::NotActive {
                id: 1,
                status: ReminderStatus::SentSuccess,
            },
            ReminderError::Validation("body".into()),
            ReminderError::Every(EveryError::OutOfRange(Every::new_unchecked(2, Period::Year))),
        ];
        for err in errors {
            assert_eq!(err.kind(), ErrorKind::Domain, "{err}");
            assert!(err.http_status().is_client_error(), "{err}");
        }
    }

    #[test]
    fn quota_errors_map_to_4xx() {
        let err = ReminderError::ActiveLimitExceeded { limit: 10 };
        assert_eq!(err.kind(), ErrorKind::Quota);
        assert!(err.http_status().is_client_error());
    }

    #[test]
    fn infrastructure_errors_map_to_5xx() {
        let db: ReminderError = sea_orm::DbErr::Custom("connection reset".into()).into();
        assert!(db.is_infrastructure());
        assert!(db.http_status().is_server_error());

        let broker: ReminderError = BrokerError::Closed("channel").into();
        assert!(broker.is_infrastructure());
        assert!(broker.http_status().is_server_error());
    }

    #[test]
    fn cancellation_is_its_own_kind() {
        let err = ReminderError::Cancelled;
        assert!(err.is_cancelled());
        assert!(!err.is_infrastructure());
    }
}
