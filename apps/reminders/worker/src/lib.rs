//! Reminders Worker Service
//!
//! Moves reminders from the database onto the broker and delivers them when
//! the broker hands them back.
//!
//! ## Architecture
//!
//! ```text
//! PostgreSQL (reminders)
//!   ↓ SweepScheduler (every REMINDERS_SWEEP_INTERVAL_SECS)
//! AMQP x-delayed-message exchange (reminders.delayed)
//!   ↓ delay elapses
//! AMQP queue (reminders.ready)
//!   ↓ ReadyConsumer
//! Pipeline: Prepare (+ next occurrence) → Send
//!   ↓
//! Email / Telegram / in-process push
//! ```
//!
//! ## Features
//!
//! - Self-healing broker connection and channels
//! - At-least-once delivery; redelivered messages are no-ops
//! - Graceful shutdown: in-flight messages finish or are requeued
//! - Health, readiness and Prometheus endpoints

pub mod config;
pub mod health;
pub mod metrics;

use std::sync::Arc;

use amqp_broker::{BrokerConfig, ResilientChannel, ResilientConnection};
use core_config::{Environment, FromEnv};
use database::postgres::{self, PostgresConfig};
use domain_reminders::{
    AmqpReminderPublisher, ChannelDispatcher, EmailSender, PgUnitOfWork, Pipeline, PushHub,
    ReadyConsumer, ReminderSettings, SmtpConfig, SweepScheduler, TelegramConfig, TelegramSender,
};
use eyre::{Result, WrapErr};
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

use crate::config::WorkerConfig;
use crate::health::HealthState;

async fn start_health_server(state: HealthState, port: u16) -> Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr)
        .await
        .wrap_err_with(|| format!("Failed to bind health server to {}", addr))?;

    info!(port = %port, "Health server listening");

    axum::serve(listener, health::router(state))
        .await
        .wrap_err("Health server failed")?;

    Ok(())
}

/// Email is always wired; Telegram only when a bot token is configured.
fn build_dispatcher(hub: &PushHub) -> Result<ChannelDispatcher> {
    let smtp = SmtpConfig::from_env().wrap_err("Failed to load SMTP configuration")?;
    let email = EmailSender::new(&smtp).wrap_err("Failed to build email sender")?;
    let mut dispatcher = ChannelDispatcher::new()
        .with_email(Arc::new(email))
        .with_push(Arc::new(hub.clone()));

    match TelegramConfig::from_env_optional().wrap_err("Failed to load Telegram configuration")? {
        Some(telegram) => {
            let sender = TelegramSender::new(telegram).wrap_err("Failed to build Telegram sender")?;
            dispatcher = dispatcher.with_telegram(Arc::new(sender));
        }
        None => warn!("TELEGRAM_BOT_TOKEN not set, Telegram deliveries will fail"),
    }

    Ok(dispatcher)
}

/// Log in-process pushes; the worker has no websocket clients of its own.
async fn log_pushes(hub: PushHub, mut shutdown: watch::Receiver<bool>) {
    let mut rx = hub.subscribe();
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            message = rx.recv() => match message {
                Ok(message) => debug!(
                    user_id = message.user_id,
                    channel_id = message.channel_id,
                    reminder_id = message.reminder_id,
                    "Push delivered"
                ),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Push log fell behind");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}

async fn close_channel(name: &'static str, channel: &ResilientChannel) {
    if let Err(e) = channel.close().await {
        warn!(channel = name, error = %e, "Failed to close AMQP channel");
    }
}

/// Run the reminders worker
///
/// # Errors
///
/// Returns an error if configuration is invalid, PostgreSQL or the broker
/// cannot be reached at startup, or migrations fail. Once running, broker and
/// database outages are retried rather than returned.
pub async fn run() -> Result<()> {
    core_config::tracing::install_color_eyre();
    let environment = Environment::from_env();
    core_config::tracing::init_tracing(&environment);

    metrics::init_metrics()?;

    let app_name = env!("CARGO_PKG_NAME");
    let app_version = env!("CARGO_PKG_VERSION");
    info!(name = %app_name, version = %app_version, "Starting reminders worker");

    let worker_config = WorkerConfig::from_env().wrap_err("Failed to load worker configuration")?;
    let settings = ReminderSettings::from_env().wrap_err("Failed to load reminder settings")?;
    let pg_config = PostgresConfig::from_env().wrap_err("Failed to load PostgreSQL configuration")?;
    let broker_config = BrokerConfig::from_env().wrap_err("Failed to load broker configuration")?;
    info!(
        horizon_secs = settings.horizon.num_seconds(),
        sweep_interval_secs = settings.sweep_interval.as_secs(),
        max_sending_delay_secs = settings.max_sending_delay.num_seconds(),
        exchange = %broker_config.exchange,
        queue = %broker_config.queue,
        prefetch = broker_config.prefetch,
        requeue_delay_ms = worker_config.requeue_delay.as_millis() as u64,
        "Configuration loaded"
    );

    info!("Connecting to PostgreSQL...");
    let db = postgres::connect_with_retry(pg_config, None)
        .await
        .wrap_err("Failed to connect to PostgreSQL")?;

    if worker_config.run_migrations {
        postgres::run_migrations::<migration::Migrator>(&db, app_name)
            .await
            .wrap_err("Failed to run migrations")?;
    }

    info!("Connecting to AMQP broker...");
    let prefetch = usize::from(broker_config.prefetch);
    let broker = ResilientConnection::dial(broker_config)
        .await
        .wrap_err("Failed to connect to AMQP broker")?;
    let publish_channel = broker
        .open_channel()
        .await
        .wrap_err("Failed to open publishing channel")?;
    publish_channel
        .declare_delayed_topology()
        .await
        .wrap_err("Failed to declare broker topology")?;
    let consume_channel = broker
        .open_channel()
        .await
        .wrap_err("Failed to open consuming channel")?;

    let hub = PushHub::default();
    let dispatcher = build_dispatcher(&hub)?;

    let uow = Arc::new(PgUnitOfWork::new(db.clone()));
    let publisher = Arc::new(AmqpReminderPublisher::new(publish_channel.clone()));
    let scheduler = SweepScheduler::new(uow.clone(), publisher.clone(), settings);
    let pipeline = Pipeline::new(uow, publisher, dispatcher, settings);
    let consumer = Arc::new(
        ReadyConsumer::new(pipeline)
            .with_concurrency(prefetch)
            .with_requeue_delay(worker_config.requeue_delay),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        if let Err(e) = shutdown_signal().await {
            error!("Error waiting for shutdown signal: {}", e);
        }
        let _ = shutdown_tx.send(true);
    });

    let health_state = HealthState {
        db,
        broker: broker.clone(),
        app_name,
        app_version,
    };
    tokio::spawn(async move {
        if let Err(e) = start_health_server(health_state, worker_config.health_port).await {
            error!(error = %e, "Health server failed");
        }
    });

    tokio::spawn(log_pushes(hub, shutdown_rx.clone()));

    let scheduler_rx = shutdown_rx.clone();
    let scheduler_task = tokio::spawn(async move { scheduler.run(scheduler_rx).await });
    let consumer_task = tokio::spawn(consumer.run(consume_channel.clone(), shutdown_rx));

    let (scheduler_result, consumer_result) = tokio::join!(scheduler_task, consumer_task);
    if let Err(e) = scheduler_result {
        error!(error = %e, "Sweep scheduler task failed");
    }
    if let Err(e) = consumer_result {
        error!(error = %e, "Consumer task failed");
    }

    close_channel("consume", &consume_channel).await;
    close_channel("publish", &publish_channel).await;
    if let Err(e) = broker.close().await {
        warn!(error = %e, "Failed to close AMQP connection");
    }

    info!("Reminders worker stopped");
    Ok(())
}

/// Wait for a shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())
        .wrap_err("Failed to install SIGTERM handler")?;

    #[cfg(unix)]
    let terminate = terminate.recv();

    #[cfg(not(unix))]
    let terminate = std::future::pending::<Option<()>>();

    tokio::select! {
        result = signal::ctrl_c() => {
            result.wrap_err("Failed to listen for Ctrl+C")?;
            info!("Received Ctrl+C, initiating shutdown...");
        },
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        },
    }

    Ok(())
}
