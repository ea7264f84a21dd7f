//! End-to-end runs of the staging pipeline: SQLite storage, the in-memory
//! broker, the messaging gateway and the core services wired by `build_state`.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use livesync_core::errors::Error;
use livesync_core::publishing::{QueueName, StageMessage};
use livesync_core::staging::{NewManifest, NewMetric, NewStats};
use livesync_core::{EntityKind, Result, StagingStatus};
use livesync_messaging::{
    resolve_client, IdempotentHandler, InMemoryBroker, MessageHandler, MessagingGateway,
    QueueConfig, ReconnectPolicy,
};
use livesync_server::config::Config;
use livesync_server::{build_state_with_broker, AppState};
use serde_json::{json, Map};
use tempfile::TempDir;

const STATS_QUEUE: &str = "stats_queue";
const GLOBE_QUEUE: &str = "globe_queue";

fn test_config(dir: &TempDir, max_attempts: u32) -> Config {
    let db_path = dir.path().join("livesync.db").to_string_lossy().to_string();
    let attempts = max_attempts.to_string();
    let vars = [
        ("LIVESYNC_ENV", "test"),
        ("LIVESYNC_DB_PATH", db_path.as_str()),
        ("STATS_RABBITMQ_HOST", "memory://local"),
        ("GLOBE_RABBITMQ_HOST", "memory://local"),
        ("LIVESYNC_PUBLISH_MAX_ATTEMPTS", attempts.as_str()),
        ("LIVESYNC_PUBLISH_BACKOFF_MS", "1"),
        ("LIVESYNC_PUBLISH_MAX_BACKOFF_MS", "5"),
        ("LIVESYNC_PUBLISH_TIMEOUT_MS", "1000"),
        ("LIVESYNC_SYNC_INTERVAL_SECS", "0"),
    ];
    let mut config = Config::from_lookup(|key| {
        vars.iter()
            .find(|(name, _)| *name == key)
            .map(|(_, value)| value.to_string())
    })
    .unwrap();
    config.reconnect = ReconnectPolicy::new(Duration::from_millis(5), Duration::from_millis(20));
    config
}

async fn start(max_attempts: u32) -> (Arc<AppState>, InMemoryBroker, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let broker = InMemoryBroker::new();
    let state = build_state_with_broker(&test_config(&dir, max_attempts), broker.clone())
        .await
        .unwrap();
    (state, broker, dir)
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

fn status_of(state: &AppState, kind: EntityKind, id: &str) -> StagingStatus {
    state.query_service.get_staged(kind, id).unwrap().status
}

async fn wait_for_status(state: &AppState, kind: EntityKind, id: &str, status: StagingStatus) {
    wait_until(|| status_of(state, kind, id) == status).await;
}

fn counters(count: i64) -> Map<String, serde_json::Value> {
    let mut map = Map::new();
    map.insert("count".to_string(), json!(count));
    map
}

async fn stage_manifest(state: &AppState, id: &str) -> String {
    state
        .command_service
        .stage_manifest(NewManifest {
            id: Some(id.to_string()),
            body: json!({"title": "batch-42"}),
        })
        .await
        .unwrap()
}

#[tokio::test]
async fn staged_manifest_is_published_and_referential_integrity_holds() {
    let (state, broker, _dir) = start(3).await;

    let manifest_id = stage_manifest(&state, "m1").await;
    assert_eq!(manifest_id, "m1");

    let status = state.query_service.get_manifest("m1").unwrap().status;
    assert!(matches!(
        status,
        StagingStatus::Staged | StagingStatus::Published
    ));
    wait_for_status(&state, EntityKind::Manifest, "m1", StagingStatus::Published).await;
    assert_eq!(broker.ready_count(STATS_QUEUE), 1);

    let stats_id = state
        .command_service
        .stage_stats(
            "m1",
            NewStats {
                id: None,
                counters: counters(10),
            },
        )
        .await
        .unwrap();
    wait_for_status(&state, EntityKind::Stats, &stats_id, StagingStatus::Published).await;
    assert_eq!(broker.ready_count(STATS_QUEUE), 2);

    let err = state
        .command_service
        .stage_stats(
            "missing-id",
            NewStats {
                id: None,
                counters: counters(1),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Referential { .. }));

    state.shutdown().await;
}

#[tokio::test]
async fn offline_gateway_leaves_entity_staged_until_sync() {
    let (state, broker, _dir) = start(2).await;
    stage_manifest(&state, "m1").await;
    wait_for_status(&state, EntityKind::Manifest, "m1", StagingStatus::Published).await;

    broker.set_online(false);
    let metric_id = state
        .command_service
        .stage_metric(
            "m1",
            NewMetric {
                id: Some("latency-1".to_string()),
                name: "latency".to_string(),
                value: 12.3,
            },
        )
        .await
        .unwrap();

    // Let the publish attempts run out while the broker is down.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(
        status_of(&state, EntityKind::Metric, &metric_id),
        StagingStatus::Staged
    );
    assert_eq!(broker.ready_count(GLOBE_QUEUE), 0);

    broker.set_online(true);
    wait_until(|| state.gateway.is_connected(QueueName::Globe)).await;

    let report = state.sync_service.sync().await.unwrap();
    assert_eq!(report.republished, 1);
    assert_eq!(report.already_synced, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(
        status_of(&state, EntityKind::Metric, &metric_id),
        StagingStatus::Published
    );
    assert_eq!(broker.ready_count(GLOBE_QUEUE), 1);

    let second = state.sync_service.sync().await.unwrap();
    assert!(second.is_clean());
    assert_eq!(second.republished, 0);
    assert_eq!(second.already_synced, 2);

    state.shutdown().await;
}

#[derive(Default)]
struct CountingConsumer {
    handled: AtomicU32,
}

#[async_trait]
impl MessageHandler for CountingConsumer {
    async fn handle(&self, message: &StageMessage) -> Result<()> {
        assert_eq!(message.entity_id, "m1");
        self.handled.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn failed_publish_is_recovered_by_sync_and_deduplicated_downstream() {
    let (state, broker, _dir) = start(1).await;

    broker.lose_next_confirms(1);
    stage_manifest(&state, "m1").await;
    wait_for_status(&state, EntityKind::Manifest, "m1", StagingStatus::Failed).await;

    let failed = state.query_service.get_manifest("m1").unwrap();
    assert!(failed.last_error.is_some());

    let report = state.sync_service.sync().await.unwrap();
    assert_eq!(report.republished, 1);
    assert_eq!(
        status_of(&state, EntityKind::Manifest, "m1"),
        StagingStatus::Published
    );
    // The unconfirmed copy reached the queue too.
    assert_eq!(broker.ready_count(STATS_QUEUE), 2);
    let ids: Vec<String> = broker
        .peek(STATS_QUEUE)
        .iter()
        .map(|payload| StageMessage::from_bytes(payload).unwrap().message_id)
        .collect();
    assert_eq!(ids[0], ids[1]);

    let consumer_config = QueueConfig::new("memory://local", STATS_QUEUE);
    let consumer = MessagingGateway::new(ReconnectPolicy::default()).with_queue(
        QueueName::Stats,
        consumer_config.clone(),
        resolve_client(&consumer_config, &broker).unwrap(),
    );
    consumer.connect().await.unwrap();
    let counting = Arc::new(CountingConsumer::default());
    consumer
        .consume(
            QueueName::Stats,
            Arc::new(IdempotentHandler::new(counting.clone())),
        )
        .unwrap();

    wait_until(|| broker.ready_count(STATS_QUEUE) == 0 && broker.unacked_count(STATS_QUEUE) == 0)
        .await;
    assert_eq!(counting.handled.load(Ordering::SeqCst), 1);

    consumer.shutdown().await;
    state.shutdown().await;
}

#[tokio::test]
async fn shutdown_drains_queued_events() {
    let (state, broker, _dir) = start(3).await;

    for i in 0..5 {
        stage_manifest(&state, &format!("m{}", i)).await;
    }
    state.shutdown().await;

    assert_eq!(broker.ready_count(STATS_QUEUE), 5);
    for i in 0..5 {
        assert_eq!(
            status_of(&state, EntityKind::Manifest, &format!("m{}", i)),
            StagingStatus::Published
        );
    }
}

#[tokio::test]
async fn unsupported_broker_scheme_fails_startup() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(&dir, 1);
    config.stats_queue.host = "amqp://localhost:5672/spot".to_string();

    let err = match build_state_with_broker(&config, InMemoryBroker::new()).await {
        Ok(_) => panic!("amqp:// has no transport in this build"),
        Err(err) => format!("{:#}", err),
    };
    assert!(err.contains("STATS_RABBITMQ_HOST"));
    assert!(err.contains("memory://"));
}

#[tokio::test]
async fn default_development_config_starts() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("livesync.db").to_string_lossy().to_string();
    let config = Config::from_lookup(|key| {
        (key == "LIVESYNC_DB_PATH").then(|| db_path.clone())
    })
    .unwrap();

    let state = build_state_with_broker(&config, InMemoryBroker::new())
        .await
        .unwrap();
    assert!(state.gateway.is_connected(QueueName::Stats));
    assert!(state.gateway.is_connected(QueueName::Globe));
    state.shutdown().await;
}
