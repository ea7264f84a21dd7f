use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, info};

use super::staging_model::{
    EntityKind, NewManifest, NewMetric, NewStats, StagedEntity, StatusChange,
};
use super::staging_status::StagingStatus;
use super::staging_traits::{StageCommandServiceTrait, StagedEntityRepositoryTrait};
use super::staging_validation::{
    resolve_id, validate_id, validate_manifest, validate_metric, validate_stats,
};
use crate::errors::{DatabaseError, Error, Result, ValidationError};
use crate::events::{DomainEvent, DomainEventSink};
use crate::utils::{retry_transient, RetryPolicy};

/// Command handlers for staging writes and status updates.
///
/// Each successful staging write emits exactly one `DomainEvent`, after the
/// write has committed.
pub struct StageCommandService {
    repository: Arc<dyn StagedEntityRepositoryTrait>,
    event_sink: Arc<dyn DomainEventSink>,
    store_retry: RetryPolicy,
}

impl StageCommandService {
    pub fn new(
        repository: Arc<dyn StagedEntityRepositoryTrait>,
        event_sink: Arc<dyn DomainEventSink>,
    ) -> Self {
        Self {
            repository,
            event_sink,
            store_retry: RetryPolicy::store_default(),
        }
    }

    pub fn with_store_retry(mut self, policy: RetryPolicy) -> Self {
        self.store_retry = policy;
        self
    }

    async fn ensure_manifest(&self, kind: EntityKind, manifest_id: &str) -> Result<()> {
        let repository = &self.repository;
        let exists = retry_transient(&self.store_retry, "manifest lookup", move || async move {
            repository.exists(EntityKind::Manifest, manifest_id)
        })
        .await?;
        if !exists {
            return Err(Error::Referential {
                kind,
                manifest_id: manifest_id.to_string(),
            });
        }
        Ok(())
    }

    fn find_existing(&self, kind: EntityKind, id: &str) -> Result<Option<StagedEntity>> {
        match self.repository.get(kind, id) {
            Ok(entity) => Ok(Some(entity)),
            Err(Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Replaying an accepted submission returns the original id without a
    /// second write or event. A different payload under the same id is rejected.
    fn resubmission(existing: StagedEntity, submitted: &StagedEntity) -> Result<String> {
        if existing.same_payload(submitted) {
            debug!(
                "{} '{}' already staged with identical payload",
                existing.kind, existing.id
            );
            Ok(existing.id)
        } else {
            Err(ValidationError::ConflictingResubmission {
                kind: existing.kind,
                id: existing.id,
            }
            .into())
        }
    }

    async fn stage(&self, entity: StagedEntity, producer_id: bool) -> Result<String> {
        if producer_id {
            if let Some(existing) = self.find_existing(entity.kind, &entity.id)? {
                return Self::resubmission(existing, &entity);
            }
        }

        let staged = entity.into_staged();
        let repository = &self.repository;
        let candidate = &staged;
        let written = retry_transient(&self.store_retry, "staging write", move || {
            let entity = candidate.clone();
            async move { repository.insert(entity).await }
        })
        .await;

        match written {
            Ok(saved) => {
                debug!("Staged {} '{}'", saved.kind, saved.id);
                self.event_sink.emit(DomainEvent::staged(&saved));
                Ok(saved.id)
            }
            // Lost a race against a concurrent submission of the same id.
            Err(Error::Database(DatabaseError::UniqueViolation(_))) => {
                let existing = self.repository.get(staged.kind, &staged.id)?;
                Self::resubmission(existing, &staged)
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl StageCommandServiceTrait for StageCommandService {
    async fn stage_manifest(&self, payload: NewManifest) -> Result<String> {
        let fields = validate_manifest(&payload)?;
        let (id, producer_id) = resolve_id(payload.id.as_deref())?;

        let entity = StagedEntity::pending(EntityKind::Manifest, id, None, fields);
        self.stage(entity, producer_id).await
    }

    async fn stage_stats(&self, manifest_id: &str, payload: NewStats) -> Result<String> {
        validate_id("manifestId", manifest_id)?;
        let fields = validate_stats(&payload)?;
        let (id, producer_id) = resolve_id(payload.id.as_deref())?;

        self.ensure_manifest(EntityKind::Stats, manifest_id).await?;
        let entity = StagedEntity::pending(
            EntityKind::Stats,
            id,
            Some(manifest_id.to_string()),
            fields,
        );
        self.stage(entity, producer_id).await
    }

    async fn stage_metric(&self, manifest_id: &str, payload: NewMetric) -> Result<String> {
        validate_id("manifestId", manifest_id)?;
        let fields = validate_metric(&payload)?;
        let (id, producer_id) = resolve_id(payload.id.as_deref())?;

        self.ensure_manifest(EntityKind::Metric, manifest_id).await?;
        let entity = StagedEntity::pending(
            EntityKind::Metric,
            id,
            Some(manifest_id.to_string()),
            fields,
        );
        self.stage(entity, producer_id).await
    }

    async fn update_status(
        &self,
        kind: EntityKind,
        id: &str,
        status: StagingStatus,
    ) -> Result<StagedEntity> {
        validate_id("id", id)?;
        let current = self.repository.get(kind, id)?;
        if current.status == status {
            return Ok(current);
        }
        if !current.status.can_be_set_by_caller(status) {
            return Err(Error::InvalidTransition {
                kind,
                id: id.to_string(),
                from: current.status,
                to: status,
            });
        }

        let change = if status == StagingStatus::Failed {
            StatusChange::failed(current.status, "marked FAILED by status update")
        } else {
            StatusChange::new(current.status, status)
        };
        let repository = &self.repository;
        let change_ref = &change;
        let written = retry_transient(&self.store_retry, "status update", move || {
            let change = change_ref.clone();
            async move { repository.update_status(kind, id, change).await }
        })
        .await;

        match written {
            Ok(updated) => {
                info!("{} '{}' moved {} -> {}", kind, id, current.status, status);
                Ok(updated)
            }
            // A concurrent writer moved the row first; reaching the same
            // target counts as success.
            Err(Error::InvalidTransition { .. }) => {
                let latest = self.repository.get(kind, id)?;
                if latest.status == status {
                    Ok(latest)
                } else {
                    Err(Error::InvalidTransition {
                        kind,
                        id: id.to_string(),
                        from: latest.status,
                        to: status,
                    })
                }
            }
            Err(e) => Err(e),
        }
    }
}
