//! Consumer-side message handling.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use livesync_core::publishing::StageMessage;
use livesync_core::Result;
use log::debug;

/// Default number of message ids remembered by `IdempotentHandler`.
pub const DEFAULT_DEDUP_CAPACITY: usize = 10_000;

/// Processes one delivered message. `Ok` acks the delivery; `Err` nacks it
/// with requeue so the broker delivers it again.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &StageMessage) -> Result<()>;
}

#[async_trait]
impl<H: MessageHandler + ?Sized> MessageHandler for Arc<H> {
    async fn handle(&self, message: &StageMessage) -> Result<()> {
        self.as_ref().handle(message).await
    }
}

#[derive(Default)]
struct SeenIds {
    order: VecDeque<String>,
    ids: HashSet<String>,
}

/// Wraps a handler so redeliveries of an already processed message id are
/// acknowledged without calling it again.
///
/// Memory is bounded: once `capacity` ids are remembered the oldest is
/// forgotten. Failed messages are not remembered.
pub struct IdempotentHandler<H> {
    inner: H,
    capacity: usize,
    seen: Mutex<SeenIds>,
}

impl<H: MessageHandler> IdempotentHandler<H> {
    pub fn new(inner: H) -> Self {
        Self::with_capacity(inner, DEFAULT_DEDUP_CAPACITY)
    }

    pub fn with_capacity(inner: H, capacity: usize) -> Self {
        Self {
            inner,
            capacity: capacity.max(1),
            seen: Mutex::new(SeenIds::default()),
        }
    }

    fn already_seen(&self, message_id: &str) -> bool {
        self.seen
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .ids
            .contains(message_id)
    }

    fn remember(&self, message_id: &str) {
        let mut seen = self
            .seen
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !seen.ids.insert(message_id.to_string()) {
            return;
        }
        seen.order.push_back(message_id.to_string());
        while seen.order.len() > self.capacity {
            if let Some(oldest) = seen.order.pop_front() {
                seen.ids.remove(&oldest);
            }
        }
    }
}

#[async_trait]
impl<H: MessageHandler> MessageHandler for IdempotentHandler<H> {
    async fn handle(&self, message: &StageMessage) -> Result<()> {
        if self.already_seen(&message.message_id) {
            debug!(
                "Skipping duplicate message {} for {} '{}'",
                message.message_id, message.kind, message.entity_id
            );
            return Ok(());
        }
        self.inner.handle(message).await?;
        self.remember(&message.message_id);
        Ok(())
    }
}
