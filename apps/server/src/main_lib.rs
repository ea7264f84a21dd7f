use std::sync::Arc;

use anyhow::Context;
use livesync_core::publishing::{
    EventHandlerTrait, LogAlertSink, MessagePublisherTrait, QueueName, StagedEventHandler,
};
use livesync_core::staging::{
    StageCommandService, StageCommandServiceTrait, StageQueryService, StageQueryServiceTrait,
    StagedEntityRepositoryTrait,
};
use livesync_core::sync::{SyncService, SyncServiceTrait};
use livesync_messaging::{resolve_client, InMemoryBroker, MessagingGateway};
use livesync_storage_sqlite::{db, StagedEntityRepository};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::{Config, LogFormat};
use crate::domain_events::ChannelDomainEventSink;

/// Everything an embedding transport needs to drive the pipeline.
pub struct AppState {
    pub command_service: Arc<dyn StageCommandServiceTrait>,
    pub query_service: Arc<dyn StageQueryServiceTrait>,
    pub sync_service: Arc<dyn SyncServiceTrait>,
    pub gateway: Arc<MessagingGateway>,
    /// Serves every `memory://` queue.
    pub broker: InMemoryBroker,
    pub domain_event_sink: Arc<ChannelDomainEventSink>,
    pub db_path: String,
}

impl AppState {
    /// Drains queued domain events, then closes the broker channels.
    pub async fn shutdown(&self) {
        self.domain_event_sink.shutdown().await;
        self.gateway.shutdown().await;
    }
}

pub fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_current_span(false))
            .init(),
        LogFormat::Text => registry
            .with(fmt::layer().with_target(true).with_line_number(true))
            .init(),
    }
}

pub async fn build_state(config: &Config) -> anyhow::Result<Arc<AppState>> {
    build_state_with_broker(config, InMemoryBroker::new()).await
}

/// Like [`build_state`], with the in-memory broker supplied by the caller.
pub async fn build_state_with_broker(
    config: &Config,
    broker: InMemoryBroker,
) -> anyhow::Result<Arc<AppState>> {
    tracing::info!("Starting livesync ({})", config.env);

    let db_path = db::init(&config.db_path).context("initialising database")?;
    tracing::info!("Database path in use: {}", db_path);
    let pool = db::create_pool(&db_path)?;
    db::run_migrations(&pool)?;
    let writer = db::spawn_writer(pool.clone());
    let repository: Arc<dyn StagedEntityRepositoryTrait> =
        Arc::new(StagedEntityRepository::new(pool, writer));

    let stats_client = resolve_client(&config.stats_queue, &broker).with_context(|| {
        format!("resolving transport for STATS_RABBITMQ_HOST={}", config.stats_queue.host)
    })?;
    let globe_client = resolve_client(&config.globe_queue, &broker).with_context(|| {
        format!("resolving transport for GLOBE_RABBITMQ_HOST={}", config.globe_queue.host)
    })?;
    let gateway = Arc::new(
        MessagingGateway::new(config.reconnect)
            .with_queue(QueueName::Stats, config.stats_queue.clone(), stats_client)
            .with_queue(QueueName::Globe, config.globe_queue.clone(), globe_client),
    );
    gateway.connect().await?;

    let publisher: Arc<dyn MessagePublisherTrait> = gateway.clone();
    let event_handler: Arc<dyn EventHandlerTrait> = Arc::new(StagedEventHandler::new(
        repository.clone(),
        publisher,
        Arc::new(LogAlertSink),
        config.publish,
    ));

    let domain_event_sink = Arc::new(ChannelDomainEventSink::new());
    let command_service = Arc::new(
        StageCommandService::new(repository.clone(), domain_event_sink.clone())
            .with_store_retry(config.publish.store_retry),
    );
    let query_service = Arc::new(StageQueryService::new(repository.clone()));
    let sync_service = Arc::new(
        SyncService::new(repository, event_handler.clone())
            .with_concurrency(config.sync_concurrency)
            .with_store_retry(config.publish.store_retry),
    );

    domain_event_sink.start_worker(event_handler, config.sync_concurrency);

    Ok(Arc::new(AppState {
        command_service,
        query_service,
        sync_service,
        gateway,
        broker,
        domain_event_sink,
        db_path,
    }))
}
