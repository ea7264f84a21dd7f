//! Staging status and the legal transition graph.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::ValidationError;

/// Lifecycle status of a staged entity.
///
/// ```text
/// PENDING ──▶ STAGED ──▶ PUBLISHED ──▶ SYNCED
///    │           │            │
///    └───────────┴────────────┴──▶ FAILED ──(sync retry)──▶ PENDING
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StagingStatus {
    /// Accepted but not yet durably committed.
    #[default]
    Pending,
    /// Durably written; event raised.
    Staged,
    /// Broker confirmed the published event.
    Published,
    /// Publishing gave up after exhausting retries.
    Failed,
    /// Downstream acknowledged. Terminal.
    Synced,
}

impl StagingStatus {
    pub const ALL: [StagingStatus; 5] = [
        StagingStatus::Pending,
        StagingStatus::Staged,
        StagingStatus::Published,
        StagingStatus::Failed,
        StagingStatus::Synced,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StagingStatus::Pending => "PENDING",
            StagingStatus::Staged => "STAGED",
            StagingStatus::Published => "PUBLISHED",
            StagingStatus::Failed => "FAILED",
            StagingStatus::Synced => "SYNCED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StagingStatus::Synced)
    }

    /// Forward transitions available to any caller.
    ///
    /// Re-applying the current status is not a transition and is handled by
    /// callers as a no-op. `FAILED -> PENDING` is deliberately absent; see
    /// [`StagingStatus::is_retry`].
    pub fn can_transition_to(&self, next: StagingStatus) -> bool {
        use StagingStatus::*;
        matches!(
            (self, next),
            (Pending, Staged)
                | (Staged, Published)
                | (Published, Synced)
                | (Pending, Failed)
                | (Staged, Failed)
                | (Published, Failed)
        )
    }

    /// Transitions an external caller may request through `UpdateStatus`.
    ///
    /// PUBLISHED is only reachable through a broker confirm and STAGED only
    /// through a durable write, so callers can settle a published entity,
    /// or give up on a non-terminal one.
    pub fn can_be_set_by_caller(&self, next: StagingStatus) -> bool {
        use StagingStatus::*;
        matches!(
            (self, next),
            (Published, Synced) | (Pending, Failed) | (Staged, Failed) | (Published, Failed)
        )
    }

    /// The retry edge, only taken by the sync handler.
    pub fn is_retry(&self, next: StagingStatus) -> bool {
        matches!(
            (self, next),
            (StagingStatus::Failed, StagingStatus::Pending)
        )
    }
}

impl fmt::Display for StagingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StagingStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(StagingStatus::Pending),
            "STAGED" => Ok(StagingStatus::Staged),
            "PUBLISHED" => Ok(StagingStatus::Published),
            "FAILED" => Ok(StagingStatus::Failed),
            "SYNCED" => Ok(StagingStatus::Synced),
            other => Err(ValidationError::invalid_field(
                "status",
                format!("unknown staging status '{}'", other),
            )),
        }
    }
}
