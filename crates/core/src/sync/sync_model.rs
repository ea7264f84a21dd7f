//! Sync report models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::staging::{StagedEntity, UndecodableRow};

/// An entity sync could not turn into an event. Left untouched.
///
/// `kind` and `status` are the stored column values, which may not parse
/// when the row itself is corrupt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UnclassifiedEntity {
    pub kind: String,
    pub id: String,
    pub status: String,
    pub reason: String,
}

impl UnclassifiedEntity {
    pub fn new(entity: StagedEntity, reason: String) -> Self {
        Self {
            kind: entity.kind.to_string(),
            id: entity.id,
            status: entity.status.to_string(),
            reason,
        }
    }
}

impl From<UndecodableRow> for UnclassifiedEntity {
    fn from(row: UndecodableRow) -> Self {
        Self {
            kind: row.kind,
            id: row.id,
            status: row.status,
            reason: row.reason,
        }
    }
}

/// Outcome of one sync pass.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    /// Entities published again during this pass.
    pub republished: usize,
    /// Entities already PUBLISHED or SYNCED.
    pub already_synced: usize,
    /// Entities whose republish failed; they are retried on the next pass.
    pub failed: usize,
    pub unclassified: Vec<UnclassifiedEntity>,
    /// Snapshot instant; entities created later are left to the next pass.
    pub as_of: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl SyncReport {
    pub fn new(as_of: DateTime<Utc>) -> Self {
        Self {
            republished: 0,
            already_synced: 0,
            failed: 0,
            unclassified: Vec::new(),
            as_of,
            finished_at: as_of,
        }
    }

    pub fn total(&self) -> usize {
        self.republished + self.already_synced + self.failed + self.unclassified.len()
    }

    /// True when nothing needed republishing and nothing failed.
    pub fn is_clean(&self) -> bool {
        self.republished == 0 && self.failed == 0 && self.unclassified.is_empty()
    }
}

/// Per-entity outcome inside a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReconcileOutcome {
    Republished,
    AlreadySynced,
    Failed,
}
