use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};

use super::alert::{AlertSink, PublishFailure};
use super::publishing_model::{PublishAck, QueueName, StageMessage};
use super::publishing_traits::{EventHandlerTrait, MessagePublisherTrait};
use crate::constants::DEFAULT_PUBLISH_TIMEOUT_MS;
use crate::errors::{Error, Result};
use crate::events::{DomainEvent, StagedSnapshot};
use crate::staging::{StagedEntityRepositoryTrait, StagingStatus, StatusChange};
use crate::utils::{retry_transient, RetryPolicy};

/// Retry and deadline settings for publishing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishSettings {
    pub retry: RetryPolicy,
    /// Deadline for one publish attempt, confirm included.
    pub timeout: Duration,
    pub store_retry: RetryPolicy,
}

impl Default for PublishSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::publish_default(),
            timeout: Duration::from_millis(DEFAULT_PUBLISH_TIMEOUT_MS),
            store_retry: RetryPolicy::store_default(),
        }
    }
}

/// Publishes staging events to their routed queue and records the outcome.
///
/// A confirmed publish moves the entity STAGED -> PUBLISHED. When retries are
/// exhausted the entity is marked FAILED and an alert is raised, except while
/// the gateway is unreachable: the entity then stays STAGED for the next sync.
pub struct StagedEventHandler {
    repository: Arc<dyn StagedEntityRepositoryTrait>,
    publisher: Arc<dyn MessagePublisherTrait>,
    alert_sink: Arc<dyn AlertSink>,
    settings: PublishSettings,
}

impl StagedEventHandler {
    pub fn new(
        repository: Arc<dyn StagedEntityRepositoryTrait>,
        publisher: Arc<dyn MessagePublisherTrait>,
        alert_sink: Arc<dyn AlertSink>,
        settings: PublishSettings,
    ) -> Self {
        Self {
            repository,
            publisher,
            alert_sink,
            settings,
        }
    }

    async fn publish_once(&self, queue: QueueName, message: &StageMessage) -> Result<PublishAck> {
        match tokio::time::timeout(self.settings.timeout, self.publisher.publish(queue, message))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(Error::PublishUnconfirmed(format!(
                "no confirm within {:?}",
                self.settings.timeout
            ))),
        }
    }

    /// Applies a compare-and-set status change. Losing the race to a writer
    /// that already reached `target` (or went past it) is not an error.
    async fn advance(
        &self,
        snapshot: &StagedSnapshot,
        change: StatusChange,
        settled: &[StagingStatus],
    ) -> Result<()> {
        let repository = &self.repository;
        let change_ref = &change;
        let (kind, id) = (snapshot.kind, snapshot.entity_id.as_str());
        let written = retry_transient(&self.settings.store_retry, "status update", move || {
            let change = change_ref.clone();
            async move { repository.update_status(kind, id, change).await }
        })
        .await;

        match written {
            Ok(_) => Ok(()),
            Err(Error::InvalidTransition { from, .. }) if settled.contains(&from) => {
                debug!("{} '{}' already {}, skipping update", kind, id, from);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn mark_published(&self, snapshot: &StagedSnapshot) -> Result<()> {
        self.advance(
            snapshot,
            StatusChange::new(StagingStatus::Staged, StagingStatus::Published),
            &[StagingStatus::Published, StagingStatus::Synced],
        )
        .await
    }

    async fn give_up(
        &self,
        snapshot: &StagedSnapshot,
        queue: QueueName,
        attempts: u32,
        err: Error,
    ) -> Error {
        let reason = err.to_string();
        let deferred = matches!(err, Error::GatewayUnavailable(_));

        if !deferred {
            let change = StatusChange::failed(StagingStatus::Staged, reason.clone());
            if let Err(e) = self
                .advance(
                    snapshot,
                    change,
                    &[
                        StagingStatus::Failed,
                        StagingStatus::Published,
                        StagingStatus::Synced,
                    ],
                )
                .await
            {
                warn!(
                    "Could not mark {} '{}' FAILED: {}",
                    snapshot.kind, snapshot.entity_id, e
                );
            }
        }

        self.alert_sink.publish_failed(&PublishFailure {
            kind: snapshot.kind,
            entity_id: snapshot.entity_id.clone(),
            queue,
            attempts,
            reason: reason.clone(),
            marked_failed: !deferred,
        });

        if deferred {
            err
        } else {
            Error::PublishFailed {
                kind: snapshot.kind,
                id: snapshot.entity_id.clone(),
                attempts,
                reason,
            }
        }
    }
}

#[async_trait]
impl EventHandlerTrait for StagedEventHandler {
    async fn handle(&self, event: &DomainEvent) -> Result<PublishAck> {
        let snapshot = event.snapshot();
        let queue = event.queue();
        let message = &StageMessage::from_event(event);
        let operation = format!("Publishing {} '{}'", snapshot.kind, snapshot.entity_id);

        // give_up reports the number of attempts made.
        let attempts = AtomicU32::new(0);
        let counter = &attempts;
        let published = retry_transient(&self.settings.retry, &operation, move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            self.publish_once(queue, message).await
        })
        .await;

        match published {
            Ok(ack) => {
                info!(
                    "Published {} '{}' to '{}' (message {})",
                    snapshot.kind, snapshot.entity_id, queue, message.message_id
                );
                // The message is out; a failed status write leaves the
                // entity STAGED and sync republishes it.
                self.mark_published(snapshot).await?;
                Ok(ack)
            }
            Err(err) => {
                let attempts = attempts.load(Ordering::SeqCst);
                Err(self.give_up(snapshot, queue, attempts, err).await)
            }
        }
    }
}
