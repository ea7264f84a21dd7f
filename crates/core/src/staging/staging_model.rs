//! Staged entity domain models.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::staging_status::StagingStatus;
use crate::constants::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
use crate::errors::ValidationError;
use crate::publishing::QueueName;

/// The three kinds of staged records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Manifest,
    Stats,
    Metric,
}

impl EntityKind {
    pub const ALL: [EntityKind; 3] = [EntityKind::Manifest, EntityKind::Stats, EntityKind::Metric];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Manifest => "manifest",
            EntityKind::Stats => "stats",
            EntityKind::Metric => "metric",
        }
    }

    /// Fixed routing table from entity kind to destination queue.
    pub fn queue(&self) -> QueueName {
        match self {
            EntityKind::Manifest | EntityKind::Stats => QueueName::Stats,
            EntityKind::Metric => QueueName::Globe,
        }
    }

    /// Whether entities of this kind must reference a staged manifest.
    pub fn requires_manifest(&self) -> bool {
        !matches!(self, EntityKind::Manifest)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "manifest" => Ok(EntityKind::Manifest),
            "stats" => Ok(EntityKind::Stats),
            "metric" => Ok(EntityKind::Metric),
            other => Err(ValidationError::invalid_field(
                "kind",
                format!("unknown entity kind '{}'", other),
            )),
        }
    }
}

/// Domain model representing one staged record of any kind.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StagedEntity {
    pub id: String,
    pub kind: EntityKind,
    /// Owning manifest for Stats and Metric records.
    pub manifest_id: Option<String>,
    /// Snapshot of the staged payload, always a JSON object.
    pub fields: Value,
    pub status: StagingStatus,
    /// Reason of the last publish failure, cleared once the entity recovers.
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub staged_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StagedEntity {
    /// Builds a new entity in the creation state.
    pub fn pending(
        kind: EntityKind,
        id: String,
        manifest_id: Option<String>,
        fields: Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            kind,
            manifest_id,
            fields,
            status: StagingStatus::Pending,
            last_error: None,
            created_at: now,
            staged_at: now,
            updated_at: now,
        }
    }

    /// The same entity, marked as durably staged.
    pub fn into_staged(mut self) -> Self {
        self.status = StagingStatus::Staged;
        self
    }

    /// Whether `other` carries the same submitted payload.
    pub fn same_payload(&self, other: &StagedEntity) -> bool {
        self.kind == other.kind
            && self.manifest_id == other.manifest_id
            && self.fields == other.fields
    }
}

/// Input model for staging a manifest.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct NewManifest {
    /// Producer-assigned id; generated when absent.
    pub id: Option<String>,
    /// Work unit description.
    #[serde(default)]
    pub body: Value,
}

/// Input model for staging aggregate statistics.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct NewStats {
    pub id: Option<String>,
    #[serde(default)]
    pub counters: Map<String, Value>,
}

/// Input model for staging a single metric.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct NewMetric {
    pub id: Option<String>,
    pub name: String,
    pub value: f64,
}

/// Filter for paged listing queries.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StagedEntityFilter {
    pub status: Option<StagingStatus>,
    pub manifest_id: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl StagedEntityFilter {
    pub fn with_status(status: StagingStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    /// Page size clamped to `1..=MAX_PAGE_SIZE`.
    pub fn page_size(&self) -> usize {
        self.limit
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE)
    }

    pub fn page_offset(&self) -> usize {
        self.offset.unwrap_or(0)
    }

    pub fn matches(&self, entity: &StagedEntity) -> bool {
        self.status.map_or(true, |s| entity.status == s)
            && self
                .manifest_id
                .as_ref()
                .map_or(true, |m| entity.manifest_id.as_ref() == Some(m))
    }
}

/// Compare-and-set status write.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusChange {
    /// Status the caller observed; the write fails if the row moved on.
    pub from: StagingStatus,
    pub to: StagingStatus,
    pub last_error: Option<String>,
}

impl StatusChange {
    pub fn new(from: StagingStatus, to: StagingStatus) -> Self {
        Self {
            from,
            to,
            last_error: None,
        }
    }

    pub fn failed(from: StagingStatus, reason: impl Into<String>) -> Self {
        Self {
            from,
            to: StagingStatus::Failed,
            last_error: Some(reason.into()),
        }
    }
}

/// A stored row that could not be decoded into a [`StagedEntity`]. Columns
/// are kept as stored.
#[derive(Debug, Clone, PartialEq)]
pub struct UndecodableRow {
    pub kind: String,
    pub id: String,
    pub status: String,
    pub reason: String,
}

/// What a sync pass reads, taken in one transaction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncSnapshot {
    /// Entities created up to the snapshot instant that are not SYNCED yet.
    pub entities: Vec<StagedEntity>,
    pub undecodable: Vec<UndecodableRow>,
    /// Every manifest created up to the snapshot instant, SYNCED ones included.
    pub manifest_ids: HashSet<String>,
    /// SYNCED entities created up to the snapshot instant.
    pub synced: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_routing_table() {
        assert_eq!(EntityKind::Manifest.queue(), QueueName::Stats);
        assert_eq!(EntityKind::Stats.queue(), QueueName::Stats);
        assert_eq!(EntityKind::Metric.queue(), QueueName::Globe);
    }

    #[test]
    fn test_pending_entity_then_staged() {
        let entity = StagedEntity::pending(
            EntityKind::Manifest,
            "m1".to_string(),
            None,
            json!({"title": "batch-42"}),
        );
        assert_eq!(entity.status, StagingStatus::Pending);
        assert_eq!(entity.created_at, entity.staged_at);

        let staged = entity.into_staged();
        assert_eq!(staged.status, StagingStatus::Staged);
    }

    #[test]
    fn test_filter_page_size_is_bounded() {
        let filter = StagedEntityFilter {
            limit: Some(10_000),
            ..Default::default()
        };
        assert_eq!(filter.page_size(), MAX_PAGE_SIZE);

        let filter = StagedEntityFilter {
            limit: Some(0),
            ..Default::default()
        };
        assert_eq!(filter.page_size(), 1);
        assert_eq!(StagedEntityFilter::default().page_size(), DEFAULT_PAGE_SIZE);
    }

    #[test]
    fn test_filter_matches_status_and_manifest() {
        let mut entity = StagedEntity::pending(
            EntityKind::Stats,
            "s1".to_string(),
            Some("m1".to_string()),
            json!({"count": 10}),
        );
        entity.status = StagingStatus::Staged;

        assert!(StagedEntityFilter::with_status(StagingStatus::Staged).matches(&entity));
        assert!(!StagedEntityFilter::with_status(StagingStatus::Failed).matches(&entity));

        let by_manifest = StagedEntityFilter {
            manifest_id: Some("m2".to_string()),
            ..Default::default()
        };
        assert!(!by_manifest.matches(&entity));
    }

    #[test]
    fn test_kind_parsing() {
        assert_eq!("Metric".parse::<EntityKind>().unwrap(), EntityKind::Metric);
        assert!("globe".parse::<EntityKind>().is_err());
        assert_eq!(serde_json::to_string(&EntityKind::Stats).unwrap(), "\"stats\"");
    }
}
