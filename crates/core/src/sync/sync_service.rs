use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use log::{debug, info, warn};

use super::sync_model::{ReconcileOutcome, SyncReport, UnclassifiedEntity};
use crate::constants::DEFAULT_SYNC_CONCURRENCY;
use crate::errors::Result;
use crate::events::DomainEvent;
use crate::publishing::EventHandlerTrait;
use crate::staging::{StagedEntity, StagedEntityRepositoryTrait, StagingStatus, StatusChange};
use crate::utils::{retry_transient, RetryPolicy};

#[async_trait]
pub trait SyncServiceTrait: Send + Sync {
    /// Runs one reconciliation pass over every entity created up to now.
    async fn sync(&self) -> Result<SyncReport>;
}

/// Republishes every staged entity the broker has not confirmed.
///
/// PUBLISHED and SYNCED entities are counted as already synced. STAGED
/// entities are republished as is. PENDING and FAILED entities are brought
/// back to STAGED first (FAILED through the retry edge). Duplicates on the
/// broker are expected and deduplicated by consumers on the message id.
pub struct SyncService {
    repository: Arc<dyn StagedEntityRepositoryTrait>,
    event_handler: Arc<dyn EventHandlerTrait>,
    concurrency: usize,
    store_retry: RetryPolicy,
}

impl SyncService {
    pub fn new(
        repository: Arc<dyn StagedEntityRepositoryTrait>,
        event_handler: Arc<dyn EventHandlerTrait>,
    ) -> Self {
        Self {
            repository,
            event_handler,
            concurrency: DEFAULT_SYNC_CONCURRENCY,
            store_retry: RetryPolicy::store_default(),
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_store_retry(mut self, policy: RetryPolicy) -> Self {
        self.store_retry = policy;
        self
    }

    /// Checks the entity can be turned into an event.
    fn classify(
        entity: &StagedEntity,
        manifests: &HashSet<String>,
    ) -> std::result::Result<(), String> {
        if !entity.fields.is_object() {
            return Err("staged fields are not an object".to_string());
        }
        if entity.kind.requires_manifest() {
            match entity.manifest_id.as_deref() {
                None => return Err("missing manifest reference".to_string()),
                Some(m) if !manifests.contains(m) => {
                    return Err(format!("manifest '{}' is not staged", m))
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    async fn transition(&self, entity: &StagedEntity, to: StagingStatus) -> Result<StagedEntity> {
        let change = StatusChange {
            from: entity.status,
            to,
            last_error: entity.last_error.clone(),
        };
        let repository = &self.repository;
        let change_ref = &change;
        let (kind, id) = (entity.kind, entity.id.as_str());
        retry_transient(&self.store_retry, "sync status update", move || {
            let change = change_ref.clone();
            async move { repository.update_status(kind, id, change).await }
        })
        .await
    }

    /// Brings an entity back to STAGED. `None` means it reached the broker
    /// in the meantime.
    async fn restage(&self, entity: StagedEntity) -> Result<Option<StagedEntity>> {
        let mut current = if entity.status == StagingStatus::Failed {
            // Re-read: a concurrent publish may have recovered it.
            self.repository.get(entity.kind, &entity.id)?
        } else {
            entity
        };
        loop {
            current = match current.status {
                StagingStatus::Staged => return Ok(Some(current)),
                StagingStatus::Published | StagingStatus::Synced => return Ok(None),
                StagingStatus::Failed => {
                    debug!("Retrying failed {} '{}'", current.kind, current.id);
                    self.transition(&current, StagingStatus::Pending).await?
                }
                StagingStatus::Pending => self.transition(&current, StagingStatus::Staged).await?,
            };
        }
    }

    async fn reconcile(&self, entity: StagedEntity) -> ReconcileOutcome {
        let (kind, id) = (entity.kind, entity.id.clone());
        let staged = match self.restage(entity).await {
            Ok(Some(staged)) => staged,
            Ok(None) => return ReconcileOutcome::AlreadySynced,
            Err(e) => {
                warn!("Sync could not restage {} '{}': {}", kind, id, e);
                return ReconcileOutcome::Failed;
            }
        };

        match self.event_handler.handle(&DomainEvent::staged(&staged)).await {
            Ok(_) => ReconcileOutcome::Republished,
            Err(e) => {
                warn!("Sync could not republish {} '{}': {}", kind, id, e);
                ReconcileOutcome::Failed
            }
        }
    }
}

#[async_trait]
impl SyncServiceTrait for SyncService {
    async fn sync(&self) -> Result<SyncReport> {
        let as_of = Utc::now();
        let repository = &self.repository;
        let snapshot = retry_transient(&self.store_retry, "sync snapshot", move || async move {
            repository.snapshot(as_of)
        })
        .await?;
        debug!(
            "Sync snapshot holds {} unsynced, {} synced and {} undecodable entities",
            snapshot.entities.len(),
            snapshot.synced,
            snapshot.undecodable.len()
        );

        let mut report = SyncReport::new(as_of);
        report.already_synced = snapshot.synced;
        for row in snapshot.undecodable {
            warn!(
                "Sync skipping undecodable {} '{}': {}",
                row.kind, row.id, row.reason
            );
            report.unclassified.push(row.into());
        }

        let mut pending = Vec::new();
        for entity in snapshot.entities {
            if let Err(reason) = Self::classify(&entity, &snapshot.manifest_ids) {
                warn!(
                    "Sync skipping unclassifiable {} '{}': {}",
                    entity.kind, entity.id, reason
                );
                report.unclassified.push(UnclassifiedEntity::new(entity, reason));
                continue;
            }
            match entity.status {
                StagingStatus::Published | StagingStatus::Synced => report.already_synced += 1,
                _ => pending.push(entity),
            }
        }

        let outcomes: Vec<ReconcileOutcome> = stream::iter(pending)
            .map(|entity| self.reconcile(entity))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        for outcome in outcomes {
            match outcome {
                ReconcileOutcome::Republished => report.republished += 1,
                ReconcileOutcome::AlreadySynced => report.already_synced += 1,
                ReconcileOutcome::Failed => report.failed += 1,
            }
        }
        report.finished_at = Utc::now();

        info!(
            "Sync finished: {} republished, {} already synced, {} failed, {} unclassified",
            report.republished,
            report.already_synced,
            report.failed,
            report.unclassified.len()
        );
        Ok(report)
    }
}
