//! Self-healing channel, delayed publishing and supervised consumption

use futures::StreamExt;
use lapin::message::Delivery;
use lapin::options::{
    BasicConsumeOptions, BasicPublishOptions, BasicQosOptions, ConfirmSelectOptions,
    ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, ExchangeKind};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, RwLock, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::connection::ResilientConnection;
use crate::error::{BrokerError, BrokerResult};
use crate::metrics;
use crate::state::{AtomicLinkState, LinkState};
use crate::topology::{DELAYED_EXCHANGE_KIND, delay_headers, delayed_exchange_arguments};

const PERSISTENT: u8 = 2;

/// A channel that reopens itself when the broker drops it.
#[derive(Clone)]
pub struct ResilientChannel {
    inner: Arc<ChannelInner>,
}

struct ChannelInner {
    conn: ResilientConnection,
    current: RwLock<Channel>,
    state: AtomicLinkState,
    lost: Arc<Notify>,
}

impl ResilientChannel {
    pub(crate) async fn open(conn: ResilientConnection) -> BrokerResult<Self> {
        let lost = Arc::new(Notify::new());
        let channel = open_on(&conn, &lost).await?;

        let inner = Arc::new(ChannelInner {
            conn,
            current: RwLock::new(channel),
            state: AtomicLinkState::new(),
            lost,
        });
        tokio::spawn(supervise(inner.clone()));

        Ok(Self { inner })
    }

    pub fn state(&self) -> LinkState {
        self.inner.state.load()
    }

    pub async fn is_connected(&self) -> bool {
        self.inner.state.is_open() && self.inner.current.read().await.status().connected()
    }

    fn retry_interval(&self) -> Duration {
        self.inner.conn.config().retry_interval
    }

    async fn live(&self) -> BrokerResult<Channel> {
        if !self.inner.state.is_open() {
            return Err(BrokerError::Closed("channel"));
        }
        Ok(self.inner.current.read().await.clone())
    }

    /// Declare the delayed exchange, the ready queue and the binding between them.
    pub async fn declare_delayed_topology(&self) -> BrokerResult<()> {
        let config = self.inner.conn.config();
        let channel = self.live().await?;

        channel
            .exchange_declare(
                &config.exchange,
                ExchangeKind::Custom(DELAYED_EXCHANGE_KIND.to_string()),
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                delayed_exchange_arguments(),
            )
            .await?;

        channel
            .queue_declare(
                &config.queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        channel
            .queue_bind(
                &config.queue,
                &config.exchange,
                &config.routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;

        info!(
            exchange = %config.exchange,
            queue = %config.queue,
            routing_key = %config.routing_key,
            "Declared delayed-message topology"
        );
        Ok(())
    }

    /// Publish `payload` so that the broker delivers it after `delay`.
    ///
    /// Returns once the broker has confirmed the message.
    #[instrument(skip(self, payload), fields(delay_ms = delay.as_millis() as u64))]
    pub async fn publish_delayed(&self, payload: &[u8], delay: Duration) -> BrokerResult<()> {
        let config = self.inner.conn.config();
        let channel = self.live().await?;

        let properties = BasicProperties::default()
            .with_content_type("application/json".into())
            .with_delivery_mode(PERSISTENT)
            .with_headers(delay_headers(delay.as_millis() as u64));

        let confirmation = channel
            .basic_publish(
                &config.exchange,
                &config.routing_key,
                BasicPublishOptions::default(),
                payload,
                properties,
            )
            .await?
            .await?;

        if confirmation.is_nack() {
            metrics::published(false);
            return Err(BrokerError::Nacked {
                exchange: config.exchange.clone(),
            });
        }
        metrics::published(true);
        Ok(())
    }

    /// Subscribe to the configured queue.
    ///
    /// Deliveries are forwarded into the returned [`Consumption`]; whenever the
    /// underlying stream ends the subscription is re-established after the retry
    /// interval, until this channel is closed.
    pub fn consume(&self) -> Consumption {
        let prefetch = self.inner.conn.config().prefetch;
        let (tx, rx) = mpsc::channel(prefetch as usize);
        let task = tokio::spawn(pump(self.clone(), tx));
        Consumption { rx, task }
    }

    /// Close the channel. The supervisor sees `Closing` and does not reopen it.
    pub async fn close(&self) -> BrokerResult<()> {
        if !self.inner.state.begin_close() {
            return Ok(());
        }
        self.inner.lost.notify_one();

        let channel = self.inner.current.read().await.clone();
        let result = channel.close(200, "OK").await;
        self.inner.state.mark_closed();
        debug!("AMQP channel closed");

        match result {
            Ok(()) => Ok(()),
            Err(e) if !channel.status().connected() => {
                debug!(error = %e, "Channel was already down when closing");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

async fn open_on(conn: &ResilientConnection, lost: &Arc<Notify>) -> Result<Channel, lapin::Error> {
    let channel = conn.current().await.create_channel().await?;
    channel
        .confirm_select(ConfirmSelectOptions::default())
        .await?;
    channel
        .basic_qos(conn.config().prefetch, BasicQosOptions::default())
        .await?;

    let lost = lost.clone();
    channel.on_error(move |err| {
        warn!(error = %err, "AMQP channel lost");
        lost.notify_one();
    });
    Ok(channel)
}

async fn supervise(inner: Arc<ChannelInner>) {
    let mut generation = inner.conn.generation();

    loop {
        tokio::select! {
            _ = inner.lost.notified() => {}
            changed = generation.changed() => {
                if changed.is_err() {
                    // Connection supervisor is gone; nothing left to reopen on
                    break;
                }
            }
        }

        if inner.state.load() != LinkState::Open {
            break;
        }
        if inner.current.read().await.status().connected() {
            continue;
        }

        loop {
            tokio::time::sleep(inner.conn.config().retry_interval).await;
            if inner.state.load() != LinkState::Open {
                debug!("Channel supervisor stopping");
                return;
            }

            match open_on(&inner.conn, &inner.lost).await {
                Ok(channel) => {
                    *inner.current.write().await = channel;
                    metrics::link_reconnected("channel");
                    info!("Reopened AMQP channel");
                    break;
                }
                Err(e) => {
                    metrics::link_retry_failed("channel");
                    warn!(error = %e, "Reopening AMQP channel failed");
                }
            }
        }
    }
    debug!("Channel supervisor stopped");
}

async fn pump(channel: ResilientChannel, tx: mpsc::Sender<Delivery>) {
    let config = channel.inner.conn.config().clone();

    loop {
        let live = match channel.live().await {
            Ok(live) => live,
            Err(_) => break,
        };

        match live
            .basic_consume(
                &config.queue,
                &config.consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
        {
            Ok(mut consumer) => {
                info!(queue = %config.queue, "Consuming");
                while let Some(next) = consumer.next().await {
                    match next {
                        Ok(delivery) => {
                            if tx.send(delivery).await.is_err() {
                                debug!("Consumption dropped, stopping subscription");
                                return;
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, "Delivery stream failed");
                            break;
                        }
                    }
                }
            }
            Err(e) => error!(error = %e, queue = %config.queue, "basic.consume failed"),
        }

        if channel.state() != LinkState::Open || tx.is_closed() {
            break;
        }
        metrics::consumer_resubscribed();
        tokio::time::sleep(channel.retry_interval()).await;
    }
    debug!("Consumption ended");
}

/// Deliveries from a supervised subscription.
pub struct Consumption {
    rx: mpsc::Receiver<Delivery>,
    task: JoinHandle<()>,
}

impl Consumption {
    /// Next delivery, or `None` once the channel has been closed.
    pub async fn next(&mut self) -> Option<Delivery> {
        self.rx.recv().await
    }
}

impl Drop for Consumption {
    fn drop(&mut self) {
        self.task.abort();
    }
}
