//! Sync service binary for the Folio article read-model.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `folio-config.yaml` (or `FOLIO_CONFIG`)
//! 2. Initialize structured logging (tracing)
//! 3. Connect to `PostgreSQL` and run migrations
//! 4. Connect to `Dragonfly`
//! 5. Connect to NATS
//! 6. Initialize the connection registries and wire the orchestrator
//! 7. Consume change records: append each to the event store, then sync
//!    its article

use std::sync::Arc;

use folio_db::{
    BatchManager, ConnectionRegistry, DragonflyPool, PostgresConfig, PostgresPool,
    RelationalManager,
};
use folio_sync::config::LoggingConfig;
use folio_sync::{
    AppError, ArticleProjection, LogFormat, NatsPublisher, PgEventSource, SyncConfig,
    SyncOrchestrator, TagProjection,
};
use folio_types::ArticleEvent;
use futures::StreamExt as _;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Application entry point for the sync service.
///
/// # Errors
///
/// Returns an error if any initialization step fails.
#[tokio::main]
async fn main() -> Result<(), AppError> {
    // 1. Load configuration.
    let config = SyncConfig::load()?;

    // 2. Initialize structured logging.
    init_tracing(&config.logging);
    info!(
        timeout_ms = config.sync.timeout_ms,
        events_subject = config.sync.events_subject,
        publish_subject = config.sync.publish_subject,
        "folio-sync starting"
    );

    // 3. PostgreSQL.
    let postgres = PostgresPool::connect(&PostgresConfig::new(&config.infrastructure.postgres_url))
        .await?;
    postgres.run_migrations().await?;

    // 4. Dragonfly.
    let dragonfly = DragonflyPool::connect(&config.infrastructure.dragonfly_url).await?;

    // 5. NATS.
    let nats_url = &config.infrastructure.nats_url;
    info!(nats_url = nats_url, "Connecting to NATS");
    let nats = async_nats::connect(nats_url)
        .await
        .map_err(|e| AppError::Nats {
            message: format!("failed to connect to NATS at {nats_url}: {e}"),
        })?;

    // 6. Registries and orchestrator.
    let pg_registry = Arc::new(ConnectionRegistry::new());
    pg_registry.initialize(postgres);
    let kv_registry = Arc::new(ConnectionRegistry::new());
    kv_registry.initialize(dragonfly);

    let source = PgEventSource::new(Arc::clone(&pg_registry));
    let orchestrator = SyncOrchestrator::new(
        source.clone(),
        ArticleProjection::new(RelationalManager::new(Arc::clone(&pg_registry))),
        TagProjection::new(BatchManager::new(Arc::clone(&kv_registry))),
        NatsPublisher::new(nats.clone(), config.sync.publish_subject.clone()),
    )
    .with_timeout(config.sync.timeout());

    // 7. Consume change records.
    let subject = config.sync.events_subject.clone();
    let subscribed = match &config.sync.queue_group {
        Some(group) => nats.queue_subscribe(subject.clone(), group.clone()).await,
        None => nats.subscribe(subject.clone()).await,
    };
    let mut records = subscribed.map_err(|e| AppError::Nats {
        message: format!("failed to subscribe to {subject}: {e}"),
    })?;
    info!(
        subject = subject,
        queue_group = config.sync.queue_group.as_deref().unwrap_or("-"),
        "Consuming change records"
    );

    while let Some(message) = records.next().await {
        let event = match serde_json::from_slice::<ArticleEvent>(&message.payload) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(error = %e, "failed to deserialize change record, skipping");
                continue;
            }
        };
        let article_id = event.article_id;
        let event_id = event.id;

        match source.record(event).await {
            Ok(true) => {}
            Ok(false) => tracing::debug!(%event_id, "change record already stored"),
            Err(e) => {
                tracing::warn!(error = %e, %event_id, "failed to store change record");
                continue;
            }
        }

        // Failures are logged by the orchestrator; the next record for the
        // article retries the sync.
        if orchestrator.sync(article_id).await.is_err() {
            tracing::debug!(%article_id, "sync left for the next change record");
        }
    }

    info!("change record subscription closed, folio-sync shutting down");
    kv_registry.invalidate();
    if let Ok(pool) = pg_registry.get() {
        pool.close().await;
    }
    pg_registry.invalidate();
    Ok(())
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured level when set.
fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    match logging.format {
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .init(),
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init(),
    }
}
