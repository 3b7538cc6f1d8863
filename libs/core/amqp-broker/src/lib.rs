//! Resilient AMQP client
//!
//! Wraps a `lapin` connection and its channels so that a broker outage never
//! surfaces to callers after the initial dial:
//!
//! - **Connection supervisor**: redials forever at a fixed interval and swaps
//!   the live handle in place
//! - **Channel supervisor**: reopens a channel that the broker dropped, but not
//!   one the application closed itself
//! - **Delayed publishing**: `x-delayed-message` exchange with a per-message
//!   `x-delay` header and publisher confirms
//! - **Supervised consumption**: resubscribes whenever the delivery stream ends
//!
//! ## Example
//!
//! ```ignore
//! use amqp_broker::{BrokerConfig, ResilientConnection};
//! use core_config::FromEnv;
//!
//! let config = BrokerConfig::from_env()?;
//! let conn = ResilientConnection::dial(config).await?;
//! let channel = conn.open_channel().await?;
//! channel.declare_delayed_topology().await?;
//! channel.publish_delayed(br#"{"id":1}"#, Duration::from_secs(30)).await?;
//!
//! let mut deliveries = channel.consume();
//! while let Some(delivery) = deliveries.next().await {
//!     // ...
//! }
//! ```

mod channel;
mod config;
mod connection;
mod error;
pub mod metrics;
mod state;
mod topology;

pub use channel::{Consumption, ResilientChannel};
pub use config::BrokerConfig;
pub use connection::ResilientConnection;
pub use error::{BrokerError, BrokerResult};
pub use state::{AtomicLinkState, LinkState};
pub use topology::{DELAY_HEADER, delay_headers};

pub use lapin::message::Delivery;
