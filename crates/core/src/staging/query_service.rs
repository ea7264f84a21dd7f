use std::sync::Arc;

use super::staging_model::{EntityKind, StagedEntity, StagedEntityFilter};
use super::staging_traits::{StageQueryServiceTrait, StagedEntityRepositoryTrait};
use super::staging_validation::validate_id;
use crate::errors::Result;

/// Read-only access to staged entities.
pub struct StageQueryService {
    repository: Arc<dyn StagedEntityRepositoryTrait>,
}

impl StageQueryService {
    pub fn new(repository: Arc<dyn StagedEntityRepositoryTrait>) -> Self {
        Self { repository }
    }
}

impl StageQueryServiceTrait for StageQueryService {
    fn get_manifest(&self, id: &str) -> Result<StagedEntity> {
        self.get_staged(EntityKind::Manifest, id)
    }

    fn get_stats(&self, id: &str) -> Result<StagedEntity> {
        self.get_staged(EntityKind::Stats, id)
    }

    fn get_metric(&self, id: &str) -> Result<StagedEntity> {
        self.get_staged(EntityKind::Metric, id)
    }

    fn get_staged(&self, kind: EntityKind, id: &str) -> Result<StagedEntity> {
        validate_id("id", id)?;
        self.repository.get(kind, id)
    }

    fn list_staged(
        &self,
        kind: EntityKind,
        filter: &StagedEntityFilter,
    ) -> Result<Vec<StagedEntity>> {
        if let Some(manifest_id) = filter.manifest_id.as_deref() {
            validate_id("manifestId", manifest_id)?;
        }
        self.repository.list(kind, filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Error;
    use crate::staging::StagingStatus;
    use crate::test_support::MockStagedEntityRepository;
    use serde_json::json;

    fn seeded() -> (StageQueryService, MockStagedEntityRepository) {
        let repository = MockStagedEntityRepository::new();
        repository.seed(
            StagedEntity::pending(EntityKind::Manifest, "m1".to_string(), None, json!({"t": 1}))
                .into_staged(),
        );
        for i in 0..3 {
            repository.seed(
                StagedEntity::pending(
                    EntityKind::Stats,
                    format!("s{}", i),
                    Some("m1".to_string()),
                    json!({"count": i}),
                )
                .into_staged(),
            );
        }
        (StageQueryService::new(Arc::new(repository.clone())), repository)
    }

    #[test]
    fn test_get_by_kind() {
        let (service, _) = seeded();
        assert_eq!(service.get_manifest("m1").unwrap().id, "m1");
        assert!(matches!(
            service.get_stats("m1"),
            Err(Error::NotFound { .. })
        ));
        assert!(matches!(
            service.get_metric("bad id"),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_list_filters_and_pages() {
        let (service, repository) = seeded();
        repository.set_status(EntityKind::Stats, "s1", StagingStatus::Failed);

        let failed = service
            .list_staged(
                EntityKind::Stats,
                &StagedEntityFilter::with_status(StagingStatus::Failed),
            )
            .unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].id, "s1");

        let page = service
            .list_staged(
                EntityKind::Stats,
                &StagedEntityFilter {
                    limit: Some(2),
                    offset: Some(2),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(page.len(), 1);
    }
}
