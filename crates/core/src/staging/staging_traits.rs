use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::staging_model::{
    EntityKind, NewManifest, NewMetric, NewStats, StagedEntity, StagedEntityFilter,
    StatusChange, SyncSnapshot,
};
use super::staging_status::StagingStatus;
use crate::errors::Result;

/// Trait defining the contract for staged entity persistence.
///
/// Entities are keyed by `(kind, id)`. Reads are synchronous; writes go
/// through the store's single writer and are async.
#[async_trait]
pub trait StagedEntityRepositoryTrait: Send + Sync {
    /// Returns `Error::NotFound` when the entity does not exist.
    fn get(&self, kind: EntityKind, id: &str) -> Result<StagedEntity>;

    fn exists(&self, kind: EntityKind, id: &str) -> Result<bool>;

    /// Paged listing, oldest staging first.
    fn list(&self, kind: EntityKind, filter: &StagedEntityFilter) -> Result<Vec<StagedEntity>>;

    /// Reads everything created at or before `as_of` in one transaction.
    /// SYNCED rows are only counted. A row that fails to decode is reported
    /// in `undecodable` and does not fail the read.
    fn snapshot(&self, as_of: DateTime<Utc>) -> Result<SyncSnapshot>;

    /// Inserts a new entity. A duplicate `(kind, id)` is reported as
    /// `DatabaseError::UniqueViolation`.
    async fn insert(&self, entity: StagedEntity) -> Result<StagedEntity>;

    /// Compare-and-set status write. Fails with `Error::InvalidTransition`
    /// when the stored status differs from `change.from`.
    async fn update_status(
        &self,
        kind: EntityKind,
        id: &str,
        change: StatusChange,
    ) -> Result<StagedEntity>;
}

/// Write side of the staging API.
#[async_trait]
pub trait StageCommandServiceTrait: Send + Sync {
    /// Stages a manifest and returns its id.
    async fn stage_manifest(&self, payload: NewManifest) -> Result<String>;

    /// Stages aggregate statistics for an already staged manifest.
    async fn stage_stats(&self, manifest_id: &str, payload: NewStats) -> Result<String>;

    /// Stages a single metric for an already staged manifest.
    async fn stage_metric(&self, manifest_id: &str, payload: NewMetric) -> Result<String>;

    /// Settles an entity: PUBLISHED to SYNCED, or a non-terminal status to
    /// FAILED. Re-applying the current status is a no-op; any other request
    /// is `Error::InvalidTransition`.
    async fn update_status(
        &self,
        kind: EntityKind,
        id: &str,
        status: StagingStatus,
    ) -> Result<StagedEntity>;
}

/// Read side of the staging API.
pub trait StageQueryServiceTrait: Send + Sync {
    fn get_manifest(&self, id: &str) -> Result<StagedEntity>;
    fn get_stats(&self, id: &str) -> Result<StagedEntity>;
    fn get_metric(&self, id: &str) -> Result<StagedEntity>;
    fn get_staged(&self, kind: EntityKind, id: &str) -> Result<StagedEntity>;
    fn list_staged(
        &self,
        kind: EntityKind,
        filter: &StagedEntityFilter,
    ) -> Result<Vec<StagedEntity>>;
}
