//! Broker client seam.

use async_trait::async_trait;

use crate::config::QueueConfig;
use crate::errors::BrokerError;

/// One message handed to a consumer, pending ack or nack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub delivery_tag: u64,
    pub payload: Vec<u8>,
    /// Set when the broker delivered this message before without an ack.
    pub redelivered: bool,
}

/// Connection to a message broker over one channel.
///
/// Implementations publish with confirms: `publish` returns only after the
/// broker accepted the message, with the confirm sequence number.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Opens the channel and declares the configured queue.
    async fn connect(&self, config: &QueueConfig) -> Result<(), BrokerError>;

    async fn publish(&self, queue: &str, payload: &[u8]) -> Result<u64, BrokerError>;

    /// Waits for the next delivery on `queue`.
    async fn next_delivery(&self, queue: &str) -> Result<Delivery, BrokerError>;

    async fn ack(&self, queue: &str, delivery_tag: u64) -> Result<(), BrokerError>;

    async fn nack(&self, queue: &str, delivery_tag: u64, requeue: bool) -> Result<(), BrokerError>;

    /// Closes the channel. Unacknowledged deliveries return to their queue.
    async fn close(&self) -> Result<(), BrokerError>;

    fn is_connected(&self) -> bool;
}
