//! Self-healing connection

use lapin::{Connection, ConnectionProperties};
use std::sync::Arc;
use tokio::sync::{Notify, RwLock, watch};
use tracing::{debug, error, info, warn};

use crate::channel::ResilientChannel;
use crate::config::BrokerConfig;
use crate::error::{BrokerError, BrokerResult};
use crate::metrics;
use crate::state::{AtomicLinkState, LinkState};

/// A broker connection that redials itself.
///
/// Cloning is cheap; every clone observes the same live handle.
#[derive(Clone)]
pub struct ResilientConnection {
    inner: Arc<ConnectionInner>,
}

struct ConnectionInner {
    config: BrokerConfig,
    current: RwLock<Arc<Connection>>,
    state: AtomicLinkState,
    lost: Arc<Notify>,
    generation: watch::Sender<u64>,
}

impl ResilientConnection {
    /// Connect once and start the supervisor.
    ///
    /// This is the only place a connection failure is returned to the caller.
    pub async fn dial(config: BrokerConfig) -> BrokerResult<Self> {
        let lost = Arc::new(Notify::new());
        let conn = open(&config.url, &lost).await?;
        info!("Connected to AMQP broker");

        let (generation, _) = watch::channel(0u64);
        let inner = Arc::new(ConnectionInner {
            config,
            current: RwLock::new(Arc::new(conn)),
            state: AtomicLinkState::new(),
            lost,
            generation,
        });

        tokio::spawn(supervise(inner.clone()));

        Ok(Self { inner })
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.inner.config
    }

    /// The live connection handle. May change after a reconnect.
    pub async fn current(&self) -> Arc<Connection> {
        self.inner.current.read().await.clone()
    }

    /// Bumped every time the supervisor installs a fresh connection.
    pub fn generation(&self) -> watch::Receiver<u64> {
        self.inner.generation.subscribe()
    }

    pub fn state(&self) -> LinkState {
        self.inner.state.load()
    }

    pub async fn is_connected(&self) -> bool {
        self.inner.state.is_open() && self.current().await.status().connected()
    }

    pub async fn open_channel(&self) -> BrokerResult<ResilientChannel> {
        if !self.inner.state.is_open() {
            return Err(BrokerError::Closed("connection"));
        }
        ResilientChannel::open(self.clone()).await
    }

    /// Close the connection and stop redialing.
    pub async fn close(&self) -> BrokerResult<()> {
        if !self.inner.state.begin_close() {
            return Ok(());
        }
        // Wake the supervisor so it observes Closing and exits
        self.inner.lost.notify_one();

        let conn = self.current().await;
        let result = conn.close(200, "OK").await;
        self.inner.state.mark_closed();
        info!("AMQP connection closed");

        match result {
            Ok(()) => Ok(()),
            // Already gone; closing a dead connection is not an error
            Err(e) if !conn.status().connected() => {
                debug!(error = %e, "Connection was already down when closing");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

async fn open(url: &str, lost: &Arc<Notify>) -> Result<Connection, lapin::Error> {
    let conn = Connection::connect(url, ConnectionProperties::default()).await?;
    let lost = lost.clone();
    conn.on_error(move |err| {
        warn!(error = %err, "AMQP connection lost");
        lost.notify_one();
    });
    Ok(conn)
}

async fn supervise(inner: Arc<ConnectionInner>) {
    loop {
        inner.lost.notified().await;
        if inner.state.load() != LinkState::Open {
            break;
        }
        // A stale permit from the previous connection
        if inner.current.read().await.status().connected() {
            continue;
        }

        loop {
            tokio::time::sleep(inner.config.retry_interval).await;
            if inner.state.load() != LinkState::Open {
                debug!("Connection supervisor stopping");
                return;
            }

            match open(&inner.config.url, &inner.lost).await {
                Ok(conn) => {
                    *inner.current.write().await = Arc::new(conn);
                    inner.generation.send_modify(|g| *g += 1);
                    metrics::link_reconnected("connection");
                    info!(
                        generation = *inner.generation.borrow(),
                        "Reconnected to AMQP broker"
                    );
                    break;
                }
                Err(e) => {
                    metrics::link_retry_failed("connection");
                    error!(
                        error = %e,
                        retry_in_ms = inner.config.retry_interval.as_millis() as u64,
                        "AMQP reconnect failed"
                    );
                }
            }
        }
    }
    debug!("Connection supervisor stopped");
}
