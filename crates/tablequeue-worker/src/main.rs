//! Standalone queue worker
//!
//! Reads queue configs from properties files, runs one pool per queue against
//! PostgreSQL and reloads the files while running.

mod config;
mod consumer;

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use tablequeue::{
    PostgresQueueDao, QueueConfigsReader, QueueConfigsReloader, QueueService, QueueShard,
    QueueShardId,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::WorkerConfig;
use crate::consumer::LoggingConsumer;

#[tokio::main]
async fn main() -> Result<()> {
    if let Ok(path) = dotenvy::dotenv() {
        eprintln!("Loaded .env from {}", path.display());
    }

    // RUST_LOG overrides the default filter
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("tablequeue=info,tablequeue_worker=info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    tracing::info!("tablequeue-worker starting...");

    let config = WorkerConfig::from_env();
    tracing::info!(
        files = ?config.config_files,
        prefix = %config.config_prefix,
        max_connections = config.max_connections,
        "Loaded worker config"
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to PostgreSQL")?;
    let dao = PostgresQueueDao::new(pool);
    if config.run_migrations {
        dao.migrate().await.context("Failed to run migrations")?;
        tracing::info!("Migrations applied");
    }

    let reader = QueueConfigsReader::new(config.config_files.clone())
        .with_prefix(config.config_prefix.clone());
    let queue_configs = reader.read().context("Failed to read queue configs")?;

    let service = Arc::new(QueueService::new(vec![QueueShard::new(
        QueueShardId::new("main"),
        Arc::new(dao),
    )]));
    let runtime = tokio::runtime::Handle::current();
    for queue_config in queue_configs {
        let queue_id = queue_config.location.queue_id().clone();
        service
            .register_queue(Arc::new(LoggingConsumer::new(queue_config, runtime.clone())))
            .with_context(|| format!("Failed to register queue {queue_id}"))?;
    }
    if service.queue_ids().is_empty() {
        tracing::warn!("No queues configured");
    }

    service.start_all();

    let cancel = CancellationToken::new();
    let reloader = QueueConfigsReloader::new(reader, Arc::clone(&service))
        .with_interval(config.reload_interval);
    let watcher = tokio::spawn(reloader.run(cancel.clone()));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Received shutdown signal");

    cancel.cancel();
    watcher.await.ok();

    service.shutdown_all();
    let pending = service.await_termination_all(config.shutdown_timeout).await;
    if pending.is_empty() {
        tracing::info!("Worker shutdown complete");
    } else {
        tracing::warn!(queues = ?pending, "Queues still running at shutdown timeout");
    }
    Ok(())
}
