use async_trait::async_trait;

use super::publishing_model::{PublishAck, QueueName, StageMessage};
use crate::errors::Result;
use crate::events::DomainEvent;

/// Broker seam used by the publishing handler.
///
/// Implementations must return only after the broker confirmed the message.
/// A fast `GatewayUnavailable` is expected while the broker is unreachable.
#[async_trait]
pub trait MessagePublisherTrait: Send + Sync {
    async fn publish(&self, queue: QueueName, message: &StageMessage) -> Result<PublishAck>;
}

/// Turns one staging event into a confirmed publish and a status update.
#[async_trait]
pub trait EventHandlerTrait: Send + Sync {
    async fn handle(&self, event: &DomainEvent) -> Result<PublishAck>;
}
