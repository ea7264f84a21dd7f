//! Messaging layer of the livesync staging pipeline.
//!
//! Holds the [`MessagingGateway`], which owns one broker channel per logical
//! queue and implements the core `MessagePublisherTrait`, the
//! [`BrokerClient`] seam a transport implements, the [`InMemoryBroker`]
//! transport (`memory://`), and the consumer side ([`MessageHandler`],
//! [`IdempotentHandler`]).
//!
//! Delivery is at-least-once. The gateway never deduplicates; consumers do,
//! keyed on the deterministic message id.

pub mod broker;
pub mod config;
pub mod consumer;
pub mod errors;
pub mod gateway;
pub mod memory;

pub use broker::{BrokerClient, Delivery};
pub use config::{QueueConfig, ReconnectPolicy};
pub use consumer::{IdempotentHandler, MessageHandler, DEFAULT_DEDUP_CAPACITY};
pub use errors::BrokerError;
pub use gateway::MessagingGateway;
pub use memory::{InMemoryBroker, InMemoryClient, MEMORY_SCHEME};

use std::sync::Arc;

/// Picks the transport for a queue from its host scheme.
///
/// `memory://` hosts are served by `memory`. Other schemes need a transport
/// this build does not ship and are rejected.
pub fn resolve_client(
    config: &QueueConfig,
    memory: &InMemoryBroker,
) -> Result<Arc<dyn BrokerClient>, BrokerError> {
    config.validate()?;
    match config.scheme() {
        Some(MEMORY_SCHEME) => Ok(Arc::new(memory.client())),
        Some(other) => Err(BrokerError::UnsupportedScheme(other.to_string())),
        None => Err(BrokerError::InvalidConfig(format!(
            "host '{}' has no scheme",
            config.host
        ))),
    }
}
