//! In-process broker with durable-queue semantics and fault injection.
//!
//! Selected by the `memory://` scheme. Every client created from the same
//! `InMemoryBroker` shares its queues, so a producer gateway and a consumer
//! gateway can talk to each other inside one process or test.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use log::{debug, info};
use tokio::sync::Notify;

use crate::broker::{BrokerClient, Delivery};
use crate::config::QueueConfig;
use crate::errors::BrokerError;

pub const MEMORY_SCHEME: &str = "memory";

#[derive(Debug, Clone)]
struct StoredMessage {
    payload: Vec<u8>,
    redelivered: bool,
}

#[derive(Debug, Default)]
struct QueueState {
    durable: bool,
    ready: VecDeque<StoredMessage>,
    unacked: BTreeMap<u64, (u64, StoredMessage)>,
}

impl QueueState {
    /// Puts unacknowledged deliveries back at the head of the queue, oldest first.
    fn requeue_where(&mut self, mut owned: impl FnMut(u64) -> bool) {
        let tags: Vec<u64> = self
            .unacked
            .iter()
            .filter(|(_, (owner, _))| owned(*owner))
            .map(|(tag, _)| *tag)
            .collect();
        for tag in tags.into_iter().rev() {
            if let Some((_, mut message)) = self.unacked.remove(&tag) {
                message.redelivered = true;
                self.ready.push_front(message);
            }
        }
    }
}

#[derive(Debug)]
struct BrokerState {
    online: bool,
    /// Bumped whenever every open connection is dropped.
    epoch: u64,
    next_delivery_tag: u64,
    next_publish_seq: u64,
    lose_confirms: u32,
    queues: HashMap<String, QueueState>,
}

impl Default for BrokerState {
    fn default() -> Self {
        Self {
            online: true,
            epoch: 0,
            next_delivery_tag: 1,
            next_publish_seq: 1,
            lose_confirms: 0,
            queues: HashMap::new(),
        }
    }
}

impl BrokerState {
    fn drop_connections(&mut self) {
        self.epoch += 1;
        for queue in self.queues.values_mut() {
            queue.requeue_where(|_| true);
        }
    }
}

/// Shared in-memory broker. Cheap to clone.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    notify: Arc<Notify>,
    next_client_id: Arc<AtomicU64>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Opens a new client on this broker.
    pub fn client(&self) -> InMemoryClient {
        InMemoryClient {
            broker: self.clone(),
            id: self.next_client_id.fetch_add(1, Ordering::SeqCst) + 1,
            session: Mutex::new(None),
        }
    }

    /// Takes the broker offline (dropping every connection) or back online.
    pub fn set_online(&self, online: bool) {
        {
            let mut state = self.state();
            if state.online == online {
                return;
            }
            state.online = online;
            if !online {
                state.drop_connections();
            }
        }
        info!("In-memory broker is now {}", if online { "online" } else { "offline" });
        self.notify.notify_waiters();
    }

    pub fn is_online(&self) -> bool {
        self.state().online
    }

    /// The next `n` publishes are enqueued but their confirms are lost.
    pub fn lose_next_confirms(&self, n: u32) {
        self.state().lose_confirms = n;
    }

    /// Simulates a broker restart: connections drop, non-durable queues and
    /// their messages are lost, durable queues keep every unacked message.
    pub fn restart(&self) {
        {
            let mut state = self.state();
            state.drop_connections();
            state.queues.retain(|_, queue| queue.durable);
        }
        info!("In-memory broker restarted");
        self.notify.notify_waiters();
    }

    /// Messages waiting for delivery on `queue`.
    pub fn ready_count(&self, queue: &str) -> usize {
        self.state().queues.get(queue).map_or(0, |q| q.ready.len())
    }

    /// Delivered but not yet acknowledged messages on `queue`.
    pub fn unacked_count(&self, queue: &str) -> usize {
        self.state().queues.get(queue).map_or(0, |q| q.unacked.len())
    }

    /// Copies of the payloads waiting on `queue`, in delivery order.
    pub fn peek(&self, queue: &str) -> Vec<Vec<u8>> {
        self.state()
            .queues
            .get(queue)
            .map(|q| q.ready.iter().map(|m| m.payload.clone()).collect())
            .unwrap_or_default()
    }
}

/// One connection to an `InMemoryBroker`.
pub struct InMemoryClient {
    broker: InMemoryBroker,
    id: u64,
    /// Broker epoch this client connected in.
    session: Mutex<Option<u64>>,
}

impl InMemoryClient {
    fn session(&self) -> Option<u64> {
        *self
            .session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_session(&self, epoch: Option<u64>) {
        *self
            .session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = epoch;
    }

    fn ensure_connected(&self, state: &BrokerState) -> Result<(), BrokerError> {
        match self.session() {
            None => Err(BrokerError::Closed),
            Some(epoch) if epoch == state.epoch && state.online => Ok(()),
            Some(_) => Err(BrokerError::ConnectionLost(
                "connection dropped by broker".to_string(),
            )),
        }
    }
}

#[async_trait]
impl BrokerClient for InMemoryClient {
    async fn connect(&self, config: &QueueConfig) -> Result<(), BrokerError> {
        let mut state = self.broker.state();
        if !state.online {
            return Err(BrokerError::Unreachable {
                host: config.host.clone(),
                reason: "broker offline".to_string(),
            });
        }
        state
            .queues
            .entry(config.queue_name.clone())
            .or_insert_with(|| QueueState {
                durable: config.durable,
                ..Default::default()
            });
        let epoch = state.epoch;
        drop(state);
        self.set_session(Some(epoch));
        debug!("Client {} declared queue '{}'", self.id, config.queue_name);
        Ok(())
    }

    async fn publish(&self, queue: &str, payload: &[u8]) -> Result<u64, BrokerError> {
        let confirm = {
            let mut state = self.broker.state();
            self.ensure_connected(&state)?;
            let queue_state = state
                .queues
                .get_mut(queue)
                .ok_or_else(|| BrokerError::QueueNotDeclared(queue.to_string()))?;
            queue_state.ready.push_back(StoredMessage {
                payload: payload.to_vec(),
                redelivered: false,
            });
            if state.lose_confirms > 0 {
                state.lose_confirms -= 1;
                Err(BrokerError::ConfirmLost(queue.to_string()))
            } else {
                let seq = state.next_publish_seq;
                state.next_publish_seq += 1;
                Ok(seq)
            }
        };
        self.broker.notify.notify_waiters();
        confirm
    }

    async fn next_delivery(&self, queue: &str) -> Result<Delivery, BrokerError> {
        loop {
            let notified = self.broker.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.broker.state();
                self.ensure_connected(&state)?;
                let tag = state.next_delivery_tag;
                let queue_state = state
                    .queues
                    .get_mut(queue)
                    .ok_or_else(|| BrokerError::QueueNotDeclared(queue.to_string()))?;
                if let Some(message) = queue_state.ready.pop_front() {
                    let delivery = Delivery {
                        delivery_tag: tag,
                        payload: message.payload.clone(),
                        redelivered: message.redelivered,
                    };
                    queue_state.unacked.insert(tag, (self.id, message));
                    state.next_delivery_tag += 1;
                    return Ok(delivery);
                }
            }

            notified.await;
        }
    }

    async fn ack(&self, queue: &str, delivery_tag: u64) -> Result<(), BrokerError> {
        let mut state = self.broker.state();
        self.ensure_connected(&state)?;
        let queue_state = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| BrokerError::QueueNotDeclared(queue.to_string()))?;
        queue_state.unacked.remove(&delivery_tag);
        Ok(())
    }

    async fn nack(&self, queue: &str, delivery_tag: u64, requeue: bool) -> Result<(), BrokerError> {
        {
            let mut state = self.broker.state();
            self.ensure_connected(&state)?;
            let queue_state = state
                .queues
                .get_mut(queue)
                .ok_or_else(|| BrokerError::QueueNotDeclared(queue.to_string()))?;
            if requeue {
                if let Some((_, mut message)) = queue_state.unacked.remove(&delivery_tag) {
                    message.redelivered = true;
                    queue_state.ready.push_front(message);
                }
            } else {
                queue_state.unacked.remove(&delivery_tag);
            }
        }
        self.broker.notify.notify_waiters();
        Ok(())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        let id = self.id;
        {
            let mut state = self.broker.state();
            for queue in state.queues.values_mut() {
                queue.requeue_where(|owner| owner == id);
            }
        }
        self.set_session(None);
        self.broker.notify.notify_waiters();
        debug!("Client {} closed", id);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        let state = self.broker.state();
        self.ensure_connected(&state).is_ok()
    }
}
