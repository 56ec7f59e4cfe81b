//! Statline status-event ingestion service.
//!
//! Main entry point. Initializes logging and storage, wires one consumer
//! engine per inbound stream, and coordinates graceful startup and
//! shutdown.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use statline_consume::{
    bus::{
        channel::{ChannelPublisher, ChannelStream},
        InboundMessage,
    },
    store::PostgresEventStore,
    ConsumerEngine, EventWriter, PersistingHandler,
};
use statline_core::{Clock, RealClock, Storage};
use tracing::info;

mod config;

use config::Config;

/// Capacity of each in-process bus channel.
const BUS_CHANNEL_CAPACITY: usize = 1024;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    info!("Starting statline ingestion service");

    let config = Config::load()?;
    info!(
        database_url = %config.database_url_masked(),
        status_topic = %config.status_topic,
        status_topic_eds = %config.status_topic_eds,
        worker_pool_size = config.worker_pool_size,
        "Configuration loaded"
    );
    info!(properties = ?config.consumer_properties_masked(), "Effective consumer settings");

    let db_pool = create_database_pool(&config).await?;
    info!("Database connection pool established");

    run_migrations(&db_pool).await?;
    info!("Database migrations completed");

    let clock: Arc<dyn Clock> = Arc::new(RealClock);
    let storage = Arc::new(Storage::new(db_pool.clone()));
    let store = Arc::new(PostgresEventStore::new(storage));
    let writer = Arc::new(EventWriter::new(store, clock.clone(), config.expiration_days));

    // The transport adapter feeds these streams through their senders with
    // records pulled using `config.consumer_properties()`; dead-letter
    // publishes flow back out through the outbound channel.
    let primary_stream = Arc::new(ChannelStream::with_capacity(BUS_CHANNEL_CAPACITY));
    let eds_stream = Arc::new(ChannelStream::with_capacity(BUS_CHANNEL_CAPACITY));
    let (dead_letter_publisher, dead_letters) =
        ChannelPublisher::with_capacity(BUS_CHANNEL_CAPACITY);
    let dead_letter_publisher = Arc::new(dead_letter_publisher);
    tokio::spawn(drain_dead_letters(dead_letters));

    let mut primary_engine = ConsumerEngine::new(
        primary_stream,
        Arc::new(PersistingHandler::new(writer.clone())),
        Some(dead_letter_publisher.clone()),
        config.primary_consumer_config(),
        clock.clone(),
    );
    let mut eds_engine = ConsumerEngine::new(
        eds_stream,
        Arc::new(PersistingHandler::new(writer)),
        Some(dead_letter_publisher),
        config.eds_consumer_config(),
        clock,
    );

    primary_engine.start().await?;
    eds_engine.start().await?;
    info!("Statline is ready to consume status events");

    shutdown_signal().await;
    info!("Shutdown signal received, starting graceful shutdown");

    primary_engine.shutdown().await?;
    eds_engine.shutdown().await?;

    db_pool.close().await;
    info!("Database connections closed");

    info!("Statline shutdown complete");
    Ok(())
}

/// Initializes tracing with environment-based configuration.
fn init_tracing() {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info,statline=debug"))
        .expect("Invalid RUST_LOG environment variable");

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
}

/// Creates the database connection pool with retry logic.
async fn create_database_pool(config: &Config) -> Result<sqlx::PgPool> {
    let mut retries = 0;
    const MAX_RETRIES: u32 = 5;
    const RETRY_DELAY: Duration = Duration::from_secs(2);

    loop {
        match PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .min_connections(config.database_min_connections)
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(600))
            .connect(&config.database_url)
            .await
        {
            Ok(pool) => {
                sqlx::query("SELECT 1")
                    .fetch_one(&pool)
                    .await
                    .context("Failed to verify database connection")?;

                return Ok(pool);
            },
            Err(_e) if retries < MAX_RETRIES => {
                retries += 1;
                info!(
                    attempt = retries,
                    max_retries = MAX_RETRIES,
                    "Database connection failed, retrying..."
                );
                tokio::time::sleep(RETRY_DELAY).await;
            },
            Err(e) => {
                return Err(e).context("Failed to create database connection pool after retries");
            },
        }
    }
}

/// Runs database migrations.
async fn run_migrations(pool: &sqlx::PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS events (
            id UUID PRIMARY KEY,
            workflow_instance_id TEXT NOT NULL,
            trace_id TEXT,
            event_type TEXT NOT NULL,
            event_status TEXT NOT NULL,
            event_date TIMESTAMPTZ NOT NULL,
            expiring_date TIMESTAMPTZ NOT NULL,
            payload JSONB NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .context("Failed to create events table")?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_events_dedup
        ON events(workflow_instance_id, event_type, event_status)
        "#,
    )
    .execute(pool)
    .await
    .context("Failed to create events dedup index")?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_events_trace_dedup
        ON events(trace_id, event_type, event_status)
        "#,
    )
    .execute(pool)
    .await
    .context("Failed to create events trace dedup index")?;

    // The external purge process scans on expiring_date.
    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_events_expiring
        ON events(expiring_date)
        "#,
    )
    .execute(pool)
    .await
    .context("Failed to create events expiring index")?;

    Ok(())
}

/// Drains the outbound dead-letter channel.
///
/// A broker-side forwarder is expected to take over this receiver; until
/// one is attached each dead letter is surfaced in the log stream rather
/// than silently dropped or left to fill the channel.
async fn drain_dead_letters(mut dead_letters: tokio::sync::mpsc::Receiver<InboundMessage>) {
    while let Some(message) = dead_letters.recv().await {
        tracing::error!(
            topic = %message.topic,
            key = ?message.key,
            payload_len = message.payload.len(),
            "dead letter produced"
        );
    }
}

/// Waits for shutdown signal (CTRL+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received CTRL+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
