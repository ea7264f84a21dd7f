//! Domain event types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::publishing::QueueName;
use crate::staging::{EntityKind, StagedEntity};

/// Snapshot of a staged entity carried by every staging event.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StagedSnapshot {
    pub entity_id: String,
    pub kind: EntityKind,
    pub manifest_id: Option<String>,
    pub staged_fields: Value,
    /// Instant the entity was staged. Stable across republishes.
    pub timestamp: DateTime<Utc>,
}

/// Domain events raised by the command handlers after a write commits.
///
/// Each variant is an immutable fact: "this entity was staged". The publishing
/// handler turns it into a broker message on the routed queue.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    ManifestStaged(StagedSnapshot),
    StatsStaged(StagedSnapshot),
    MetricStaged(StagedSnapshot),
}

impl DomainEvent {
    /// Derives the staging event for an entity.
    pub fn staged(entity: &StagedEntity) -> Self {
        let snapshot = StagedSnapshot {
            entity_id: entity.id.clone(),
            kind: entity.kind,
            manifest_id: entity.manifest_id.clone(),
            staged_fields: entity.fields.clone(),
            timestamp: entity.staged_at,
        };
        match entity.kind {
            EntityKind::Manifest => Self::ManifestStaged(snapshot),
            EntityKind::Stats => Self::StatsStaged(snapshot),
            EntityKind::Metric => Self::MetricStaged(snapshot),
        }
    }

    pub fn snapshot(&self) -> &StagedSnapshot {
        match self {
            Self::ManifestStaged(s) | Self::StatsStaged(s) | Self::MetricStaged(s) => s,
        }
    }

    pub fn kind(&self) -> EntityKind {
        self.snapshot().kind
    }

    pub fn entity_id(&self) -> &str {
        &self.snapshot().entity_id
    }

    /// Event name as exposed to external subscribers.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ManifestStaged(_) => "ManifestStaged",
            Self::StatsStaged(_) => "StatsStaged",
            Self::MetricStaged(_) => "MetricStaged",
        }
    }

    /// Destination queue according to the routing table.
    pub fn queue(&self) -> QueueName {
        self.kind().queue()
    }
}
