use thiserror::Error;

/// Broker client errors.
///
/// Only the initial dial and individual publish/declare calls return these;
/// reconnects are retried in the background and never surface.
#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("AMQP error: {0}")]
    Amqp(#[from] lapin::Error),

    /// The broker negatively acknowledged a confirmed publish
    #[error("Publish to exchange '{exchange}' was not confirmed by the broker")]
    Nacked { exchange: String },

    /// The link was closed by the application
    #[error("Broker {0} is closed")]
    Closed(&'static str),
}

impl BrokerError {
    pub fn is_closed(&self) -> bool {
        matches!(self, BrokerError::Closed(_))
    }
}

pub type BrokerResult<T> = Result<T, BrokerError>;
