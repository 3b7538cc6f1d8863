//! Ready-to-send consumer: runs the pipeline for every fired message

use std::sync::Arc;
use std::time::Duration;

use amqp_broker::{Delivery, ResilientChannel};
use lapin::options::{BasicAckOptions, BasicNackOptions};
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::cancel::{cancellable, shutdown_requested};
use crate::models::ReminderEnvelope;
use crate::pipeline::Pipeline;

/// What to tell the broker about a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    /// Negative-acknowledge and let the broker redeliver
    Requeue,
}

pub struct ReadyConsumer {
    pipeline: Pipeline,
    concurrency: usize,
    requeue_delay: Duration,
}

impl ReadyConsumer {
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            pipeline,
            concurrency: 16,
            requeue_delay: Duration::from_secs(1),
        }
    }

    /// Messages processed in parallel; match the channel prefetch.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Pause before a requeue so a failing database is not hammered.
    pub fn with_requeue_delay(mut self, delay: Duration) -> Self {
        self.requeue_delay = delay;
        self
    }

    /// Run the pipeline for one payload and decide how to settle it.
    ///
    /// Only infrastructure failures and shutdown lead to a redelivery. A
    /// failed channel send is already recorded as `SentError`.
    pub async fn handle(&self, payload: &[u8], shutdown: &watch::Receiver<bool>) -> Disposition {
        let envelope: ReminderEnvelope = match serde_json::from_slice(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                error!(
                    error = %e,
                    payload = %String::from_utf8_lossy(payload),
                    "Dropping undecodable message"
                );
                return Disposition::Ack;
            }
        };

        match cancellable(shutdown, self.pipeline.run(envelope)).await {
            Ok(report) => {
                debug!(
                    reminder_id = envelope.id,
                    outcome = report.prepared.outcome.as_str(),
                    "Message handled"
                );
                Disposition::Ack
            }
            Err(e) if e.is_cancelled() => Disposition::Requeue,
            Err(e) if e.is_infrastructure() => {
                error!(reminder_id = envelope.id, error = %e, "Pipeline failed, requeueing");
                Disposition::Requeue
            }
            Err(e) => {
                info!(reminder_id = envelope.id, error = %e, "Message discarded");
                Disposition::Ack
            }
        }
    }

    /// Consume from `channel` until shutdown.
    ///
    /// In-flight messages are allowed to finish; those interrupted by the
    /// shutdown are requeued.
    pub async fn run(self: Arc<Self>, channel: ResilientChannel, mut shutdown: watch::Receiver<bool>) {
        info!(concurrency = self.concurrency, "Starting ready-to-send consumer");

        let mut deliveries = channel.consume();
        let permits = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();

        loop {
            let permit = tokio::select! {
                _ = shutdown_requested(&mut shutdown) => break,
                permit = permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            let delivery = tokio::select! {
                _ = shutdown_requested(&mut shutdown) => break,
                next = deliveries.next() => match next {
                    Some(delivery) => delivery,
                    None => {
                        info!("Delivery stream closed");
                        break;
                    }
                },
            };

            let this = self.clone();
            let shutdown = shutdown.clone();
            tasks.spawn(async move {
                let _permit = permit;
                let disposition = this.handle(&delivery.data, &shutdown).await;
                if disposition == Disposition::Requeue && !*shutdown.borrow() {
                    tokio::time::sleep(this.requeue_delay).await;
                }
                settle(delivery, disposition).await;
            });

            while let Some(joined) = tasks.try_join_next() {
                if let Err(e) = joined {
                    error!(error = %e, "Message task panicked");
                }
            }
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Message task panicked");
            }
        }
        info!("Ready-to-send consumer stopped");
    }
}

async fn settle(delivery: Delivery, disposition: Disposition) {
    let result = match disposition {
        Disposition::Ack => delivery.acker.ack(BasicAckOptions::default()).await,
        Disposition::Requeue => {
            delivery
                .acker
                .nack(BasicNackOptions {
                    requeue: true,
                    ..Default::default()
                })
                .await
        }
    };
    // The broker redelivers anything left unsettled on a dead channel
    if let Err(e) = result {
        warn!(error = %e, ?disposition, "Failed to settle delivery");
    }
}
