//! Gateway behaviour against the in-memory broker.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use livesync_core::errors::Error;
use livesync_core::publishing::{QueueName, StageMessage};
use livesync_core::{EntityKind, Result};
use livesync_messaging::{
    resolve_client, BrokerError, IdempotentHandler, InMemoryBroker, MessageHandler,
    MessagingGateway, QueueConfig, ReconnectPolicy,
};
use serde_json::json;

const STATS_QUEUE: &str = "stats_queue";

fn fast_reconnect() -> ReconnectPolicy {
    ReconnectPolicy::new(Duration::from_millis(5), Duration::from_millis(20))
}

fn gateway(broker: &InMemoryBroker) -> MessagingGateway {
    let config = QueueConfig::new("memory://local", STATS_QUEUE);
    let client = resolve_client(&config, broker).unwrap();
    MessagingGateway::new(fast_reconnect()).with_queue(QueueName::Stats, config, client)
}

fn message(id: &str) -> StageMessage {
    StageMessage {
        message_id: id.to_string(),
        pattern: "StatsStaged".to_string(),
        entity_id: "s1".to_string(),
        kind: EntityKind::Stats,
        manifest_id: Some("m1".to_string()),
        staged_fields: json!({"count": 10}),
        timestamp: Utc::now(),
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

#[derive(Default)]
struct Recording {
    handled: AtomicU32,
    failures_left: AtomicU32,
}

#[async_trait]
impl MessageHandler for Recording {
    async fn handle(&self, _message: &StageMessage) -> Result<()> {
        if self.failures_left.load(Ordering::SeqCst) > 0 {
            self.failures_left.fetch_sub(1, Ordering::SeqCst);
            return Err(Error::Unexpected("not yet".to_string()));
        }
        self.handled.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn publish_is_confirmed_and_enqueued() {
    let broker = InMemoryBroker::new();
    let gateway = gateway(&broker);
    gateway.connect().await.unwrap();

    let ack = gateway.publish(QueueName::Stats, &message("a")).await.unwrap();

    assert_eq!(ack.queue, QueueName::Stats);
    assert_eq!(ack.message_id, "a");
    assert_eq!(broker.ready_count(STATS_QUEUE), 1);
    gateway.shutdown().await;
}

#[tokio::test]
async fn publish_fails_fast_while_offline_and_recovers() {
    let broker = InMemoryBroker::new();
    broker.set_online(false);
    let gateway = gateway(&broker);
    gateway.connect().await.unwrap();

    let err = gateway
        .publish(QueueName::Stats, &message("a"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::GatewayUnavailable(_)));
    assert_eq!(broker.ready_count(STATS_QUEUE), 0);

    broker.set_online(true);
    wait_until(|| gateway.is_connected(QueueName::Stats)).await;
    gateway.publish(QueueName::Stats, &message("a")).await.unwrap();
    gateway.shutdown().await;
}

#[tokio::test]
async fn connection_loss_marks_channel_down_then_reconnects() {
    let broker = InMemoryBroker::new();
    let gateway = gateway(&broker);
    gateway.connect().await.unwrap();
    assert!(gateway.is_connected(QueueName::Stats));

    broker.restart();
    let err = gateway
        .publish(QueueName::Stats, &message("a"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::GatewayUnavailable(_)));

    wait_until(|| gateway.is_connected(QueueName::Stats)).await;
    assert!(gateway.publish(QueueName::Stats, &message("a")).await.is_ok());
    gateway.shutdown().await;
}

#[tokio::test]
async fn lost_confirm_is_reported_as_unconfirmed() {
    let broker = InMemoryBroker::new();
    let gateway = gateway(&broker);
    gateway.connect().await.unwrap();
    broker.lose_next_confirms(1);

    let err = gateway
        .publish(QueueName::Stats, &message("a"))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::PublishUnconfirmed(_)));
    assert!(err.is_transient());
    assert_eq!(broker.ready_count(STATS_QUEUE), 1);
    gateway.shutdown().await;
}

#[tokio::test]
async fn consumer_acks_on_success_and_requeues_on_failure() {
    let broker = InMemoryBroker::new();
    let producer = gateway(&broker);
    let consumer = gateway(&broker);
    producer.connect().await.unwrap();
    consumer.connect().await.unwrap();

    let handler = Arc::new(Recording::default());
    handler.failures_left.store(1, Ordering::SeqCst);
    consumer
        .consume(QueueName::Stats, Arc::clone(&handler))
        .unwrap();

    producer.publish(QueueName::Stats, &message("a")).await.unwrap();

    wait_until(|| handler.handled.load(Ordering::SeqCst) == 1).await;
    wait_until(|| broker.unacked_count(STATS_QUEUE) == 0).await;
    assert_eq!(broker.ready_count(STATS_QUEUE), 0);

    consumer.shutdown().await;
    producer.shutdown().await;
}

#[tokio::test]
async fn idempotent_consumer_processes_duplicates_once() {
    let broker = InMemoryBroker::new();
    let producer = gateway(&broker);
    let consumer = gateway(&broker);
    producer.connect().await.unwrap();
    consumer.connect().await.unwrap();

    let handler = Arc::new(Recording::default());
    consumer
        .consume(
            QueueName::Stats,
            Arc::new(IdempotentHandler::new(Arc::clone(&handler))),
        )
        .unwrap();

    for id in ["a", "a", "b"] {
        producer.publish(QueueName::Stats, &message(id)).await.unwrap();
    }

    wait_until(|| broker.ready_count(STATS_QUEUE) == 0 && broker.unacked_count(STATS_QUEUE) == 0)
        .await;
    assert_eq!(handler.handled.load(Ordering::SeqCst), 2);

    consumer.shutdown().await;
    producer.shutdown().await;
}

#[tokio::test]
async fn shutdown_stops_publishing_and_consuming() {
    let broker = InMemoryBroker::new();
    let gateway = gateway(&broker);
    gateway.connect().await.unwrap();
    gateway
        .consume(QueueName::Stats, Arc::new(Recording::default()))
        .unwrap();

    gateway.shutdown().await;

    let err = gateway
        .publish(QueueName::Stats, &message("a"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::GatewayUnavailable(_)));
    assert!(gateway
        .consume(QueueName::Stats, Arc::new(Recording::default()))
        .is_err());
}

#[test]
fn unknown_scheme_is_rejected() {
    let broker = InMemoryBroker::new();
    let config = QueueConfig::new("amqp://localhost:5672/spot", STATS_QUEUE);
    assert!(matches!(
        resolve_client(&config, &broker),
        Err(BrokerError::UnsupportedScheme(_))
    ));
}
