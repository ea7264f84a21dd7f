//! The messaging gateway: owns one broker channel per logical queue.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use livesync_core::errors::{Error, Result};
use livesync_core::publishing::{MessagePublisherTrait, PublishAck, QueueName, StageMessage};
use log::{debug, error, info, warn};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::broker::{BrokerClient, Delivery};
use crate::config::{QueueConfig, ReconnectPolicy};
use crate::consumer::MessageHandler;
use crate::errors::BrokerError;

struct QueueChannel {
    queue: QueueName,
    config: QueueConfig,
    client: Arc<dyn BrokerClient>,
    connected: AtomicBool,
    reconnecting: AtomicBool,
}

impl QueueChannel {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Explicitly owned broker connections for the `stats` and `globe` queues.
///
/// Lifecycle: build with [`MessagingGateway::with_queue`], call
/// [`connect`](MessagingGateway::connect) once, and
/// [`shutdown`](MessagingGateway::shutdown) before exit. While a channel is
/// disconnected `publish` fails fast with `GatewayUnavailable` and a
/// background task reconnects with exponential backoff. Nothing is buffered.
pub struct MessagingGateway {
    channels: HashMap<QueueName, Arc<QueueChannel>>,
    reconnector: Reconnector,
}

impl MessagingGateway {
    pub fn new(reconnect: ReconnectPolicy) -> Self {
        Self {
            channels: HashMap::new(),
            reconnector: Reconnector {
                policy: reconnect,
                token: CancellationToken::new(),
                tasks: TaskTracker::new(),
            },
        }
    }

    pub fn with_queue(
        mut self,
        queue: QueueName,
        config: QueueConfig,
        client: Arc<dyn BrokerClient>,
    ) -> Self {
        self.channels.insert(
            queue,
            Arc::new(QueueChannel {
                queue,
                config,
                client,
                connected: AtomicBool::new(false),
                reconnecting: AtomicBool::new(false),
            }),
        );
        self
    }

    fn channel(&self, queue: QueueName) -> Result<&Arc<QueueChannel>> {
        self.channels
            .get(&queue)
            .ok_or_else(|| Error::Unexpected(format!("queue '{}' is not configured", queue)))
    }

    /// Opens every configured channel. Channels whose broker is unreachable
    /// are left to the background reconnect loop.
    pub async fn connect(&self) -> Result<()> {
        if self.is_shut_down() {
            return Err(BrokerError::Closed.into());
        }
        for channel in self.channels.values() {
            match channel.client.connect(&channel.config).await {
                Ok(()) => {
                    channel.connected.store(true, Ordering::SeqCst);
                    info!(
                        "Connected queue '{}' ({})",
                        channel.queue, channel.config.queue_name
                    );
                }
                Err(e) => {
                    warn!("Queue '{}' not connected yet: {}", channel.queue, e);
                    self.reconnector.disconnected(channel);
                }
            }
        }
        Ok(())
    }

    pub fn is_connected(&self, queue: QueueName) -> bool {
        self.channels
            .get(&queue)
            .is_some_and(|channel| channel.is_connected())
    }

    fn is_shut_down(&self) -> bool {
        self.reconnector.token.is_cancelled()
    }

    /// Publishes to the routed queue and waits for the broker confirm.
    pub async fn publish(&self, queue: QueueName, message: &StageMessage) -> Result<PublishAck> {
        if self.is_shut_down() {
            return Err(Error::GatewayUnavailable("gateway is shut down".to_string()));
        }
        let channel = self.channel(queue)?;
        if !channel.is_connected() {
            return Err(Error::GatewayUnavailable(format!(
                "queue '{}' is disconnected",
                queue
            )));
        }

        let payload = message.to_bytes()?;
        match channel
            .client
            .publish(&channel.config.queue_name, &payload)
            .await
        {
            Ok(delivery_tag) => {
                debug!(
                    "Broker confirmed message {} on '{}' (seq {})",
                    message.message_id, queue, delivery_tag
                );
                Ok(PublishAck {
                    queue,
                    message_id: message.message_id.clone(),
                    delivery_tag,
                })
            }
            Err(e) => {
                if e.is_connection_error() {
                    warn!("Lost connection on queue '{}': {}", queue, e);
                    self.reconnector.disconnected(channel);
                }
                Err(e.into())
            }
        }
    }

    /// Starts a consumer on `queue`. Each delivery is decoded and handed to
    /// `handler`; it is acked once the handler returns `Ok` and nacked with
    /// requeue otherwise. Undecodable payloads are dropped.
    pub fn consume<H>(&self, queue: QueueName, handler: Arc<H>) -> Result<()>
    where
        H: MessageHandler + 'static,
    {
        if self.is_shut_down() {
            return Err(BrokerError::Closed.into());
        }
        let channel = Arc::clone(self.channel(queue)?);
        let reconnector = self.reconnector.clone();
        self.reconnector.tasks.spawn(async move {
            consume_loop(channel, handler, reconnector).await;
        });
        Ok(())
    }

    /// Stops consumers and reconnect loops, waits for in-flight handlers to
    /// finish, then closes every broker client.
    pub async fn shutdown(&self) {
        info!("Shutting down messaging gateway");
        self.reconnector.token.cancel();
        self.reconnector.tasks.close();
        self.reconnector.tasks.wait().await;

        for channel in self.channels.values() {
            channel.connected.store(false, Ordering::SeqCst);
            if let Err(e) = channel.client.close().await {
                warn!("Closing queue '{}' failed: {}", channel.queue, e);
            }
        }
        info!("Messaging gateway stopped");
    }
}

#[async_trait]
impl MessagePublisherTrait for MessagingGateway {
    async fn publish(&self, queue: QueueName, message: &StageMessage) -> Result<PublishAck> {
        MessagingGateway::publish(self, queue, message).await
    }
}

/// Shutdown signal, task tracker and backoff shared by the gateway and its
/// background tasks.
#[derive(Clone)]
struct Reconnector {
    policy: ReconnectPolicy,
    token: CancellationToken,
    tasks: TaskTracker,
}

impl Reconnector {
    /// Marks the channel down and starts a reconnect loop unless one is
    /// already running.
    fn disconnected(&self, channel: &Arc<QueueChannel>) {
        channel.connected.store(false, Ordering::SeqCst);
        if self.token.is_cancelled() || channel.reconnecting.swap(true, Ordering::SeqCst) {
            return;
        }
        let channel = Arc::clone(channel);
        let policy = self.policy;
        let token = self.token.clone();
        self.tasks
            .spawn(async move { reconnect_loop(channel, policy, token).await });
    }
}

async fn reconnect_loop(
    channel: Arc<QueueChannel>,
    policy: ReconnectPolicy,
    token: CancellationToken,
) {
    loop {
        reconnect(&channel, policy, &token).await;
        if !clear_reconnecting(&channel, &token) {
            break;
        }
        debug!("Queue '{}' dropped again while reconnecting", channel.queue);
    }
}

/// Retries `connect` with backoff until it succeeds or `token` is cancelled.
async fn reconnect(channel: &QueueChannel, policy: ReconnectPolicy, token: &CancellationToken) {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let delay = policy.backoff_for(attempt);
        tokio::select! {
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
        match channel.client.connect(&channel.config).await {
            Ok(()) => {
                channel.connected.store(true, Ordering::SeqCst);
                info!(
                    "Reconnected queue '{}' after {} attempt(s)",
                    channel.queue, attempt
                );
                return;
            }
            Err(e) => debug!(
                "Reconnect attempt {} for queue '{}' failed: {}",
                attempt, channel.queue, e
            ),
        }
    }
}

/// Clears the reconnecting flag once a reconnect round is over.
///
/// A disconnect reported between `connected` going up and the flag clearing
/// cannot start a loop of its own. Returns true when that happened: the flag
/// is taken back and the caller must run another round.
fn clear_reconnecting(channel: &QueueChannel, token: &CancellationToken) -> bool {
    channel.reconnecting.store(false, Ordering::SeqCst);
    !channel.is_connected()
        && !token.is_cancelled()
        && !channel.reconnecting.swap(true, Ordering::SeqCst)
}

async fn consume_loop<H>(channel: Arc<QueueChannel>, handler: Arc<H>, reconnector: Reconnector)
where
    H: MessageHandler + 'static,
{
    let token = reconnector.token.clone();
    let pause = reconnector.policy.initial_backoff;
    let queue_name = channel.config.queue_name.clone();
    info!("Consumer started on queue '{}'", channel.queue);
    loop {
        if !channel.is_connected() {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(pause) => continue,
            }
        }

        let backoff = tokio::select! {
            _ = token.cancelled() => break,
            delivery = channel.client.next_delivery(&queue_name) => match delivery {
                // The handler runs to completion even if shutdown starts meanwhile.
                Ok(delivery) => match dispatch(&channel, handler.as_ref(), delivery).await {
                    Ok(Settled::Acked | Settled::Dropped) => false,
                    Ok(Settled::Requeued) => true,
                    Err(e) => {
                        warn!("Settling delivery on '{}' failed: {}", channel.queue, e);
                        if e.is_connection_error() {
                            reconnector.disconnected(&channel);
                        }
                        false
                    }
                },
                Err(e) if e.is_connection_error() => {
                    warn!("Consumer on '{}' lost its connection: {}", channel.queue, e);
                    reconnector.disconnected(&channel);
                    false
                }
                Err(e) => {
                    error!("Consumer on '{}' failed: {}", channel.queue, e);
                    true
                }
            },
        };

        if backoff {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }
    }
    info!("Consumer stopped on queue '{}'", channel.queue);
}

enum Settled {
    Acked,
    Dropped,
    Requeued,
}

async fn dispatch<H>(
    channel: &QueueChannel,
    handler: &H,
    delivery: Delivery,
) -> std::result::Result<Settled, BrokerError>
where
    H: MessageHandler,
{
    let queue_name = channel.config.queue_name.as_str();
    let message = match StageMessage::from_bytes(&delivery.payload) {
        Ok(message) => message,
        Err(e) => {
            error!(
                "Dropping undecodable delivery {} on '{}': {}",
                delivery.delivery_tag, channel.queue, e
            );
            channel
                .client
                .nack(queue_name, delivery.delivery_tag, false)
                .await?;
            return Ok(Settled::Dropped);
        }
    };

    match handler.handle(&message).await {
        Ok(()) => {
            channel.client.ack(queue_name, delivery.delivery_tag).await?;
            Ok(Settled::Acked)
        }
        Err(e) => {
            warn!(
                "Handler failed for message {} on '{}', requeueing: {}",
                message.message_id, channel.queue, e
            );
            channel
                .client
                .nack(queue_name, delivery.delivery_tag, true)
                .await?;
            Ok(Settled::Requeued)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryBroker;
    use std::time::Duration;

    fn channel(broker: &InMemoryBroker) -> Arc<QueueChannel> {
        Arc::new(QueueChannel {
            queue: QueueName::Stats,
            config: QueueConfig::new("memory://local", "stats_queue"),
            client: Arc::new(broker.client()),
            connected: AtomicBool::new(false),
            reconnecting: AtomicBool::new(false),
        })
    }

    fn reconnector() -> Reconnector {
        Reconnector {
            policy: ReconnectPolicy::new(Duration::from_millis(1), Duration::from_millis(5)),
            token: CancellationToken::new(),
            tasks: TaskTracker::new(),
        }
    }

    #[test]
    fn test_clear_reconnecting_after_clean_reconnect() {
        let broker = InMemoryBroker::new();
        let channel = channel(&broker);
        channel.reconnecting.store(true, Ordering::SeqCst);
        channel.connected.store(true, Ordering::SeqCst);

        assert!(!clear_reconnecting(&channel, &CancellationToken::new()));
        assert!(!channel.reconnecting.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_disconnect_while_flag_still_set_gets_another_round() {
        let broker = InMemoryBroker::new();
        let channel = channel(&broker);
        let reconnector = reconnector();

        // A round just connected but has not cleared its flag yet.
        channel.reconnecting.store(true, Ordering::SeqCst);
        channel.connected.store(true, Ordering::SeqCst);

        // A publish fails in that window and finds the flag set.
        reconnector.disconnected(&channel);
        assert!(reconnector.tasks.is_empty());
        assert!(!channel.is_connected());

        assert!(clear_reconnecting(&channel, &reconnector.token));
        assert!(channel.reconnecting.load(Ordering::SeqCst));

        // The round that took the flag back brings the channel up again.
        reconnect(&channel, reconnector.policy, &reconnector.token).await;
        assert!(!clear_reconnecting(&channel, &reconnector.token));
        assert!(channel.is_connected());
        assert!(!channel.reconnecting.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_cancelled_reconnect_does_not_take_the_flag_back() {
        let broker = InMemoryBroker::new();
        broker.set_online(false);
        let channel = channel(&broker);
        let reconnector = reconnector();
        reconnector.token.cancel();

        channel.reconnecting.store(true, Ordering::SeqCst);
        reconnect_loop(channel.clone(), reconnector.policy, reconnector.token.clone()).await;

        assert!(!channel.is_connected());
        assert!(!channel.reconnecting.load(Ordering::SeqCst));
    }
}
