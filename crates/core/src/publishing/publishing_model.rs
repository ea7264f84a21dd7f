//! Broker-facing message models.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::constants::{GLOBE_QUEUE, STATS_QUEUE};
use crate::errors::{Result, ValidationError};
use crate::events::DomainEvent;
use crate::staging::EntityKind;

/// Logical destination queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueName {
    Stats,
    Globe,
}

impl QueueName {
    pub const ALL: [QueueName; 2] = [QueueName::Stats, QueueName::Globe];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueName::Stats => STATS_QUEUE,
            QueueName::Globe => GLOBE_QUEUE,
        }
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueName {
    type Err = ValidationError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim() {
            STATS_QUEUE => Ok(QueueName::Stats),
            GLOBE_QUEUE => Ok(QueueName::Globe),
            other => Err(ValidationError::invalid_field(
                "queue",
                format!("unknown queue '{}'", other),
            )),
        }
    }
}

/// Deterministic message id: identical for every republish of the same
/// staging, so consumers can deduplicate on it.
pub fn compute_message_id(kind: EntityKind, entity_id: &str, staged_at: DateTime<Utc>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(kind.as_str().as_bytes());
    hasher.update(b"|");
    hasher.update(entity_id.as_bytes());
    hasher.update(b"|");
    hasher.update(staged_at.timestamp_micros().to_be_bytes());
    hex::encode(hasher.finalize())
}

/// Wire payload of a staging event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StageMessage {
    pub message_id: String,
    /// Event name, e.g. `StatsStaged`.
    pub pattern: String,
    pub entity_id: String,
    pub kind: EntityKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest_id: Option<String>,
    pub staged_fields: Value,
    pub timestamp: DateTime<Utc>,
}

impl StageMessage {
    pub fn from_event(event: &DomainEvent) -> Self {
        let snapshot = event.snapshot();
        Self {
            message_id: compute_message_id(snapshot.kind, &snapshot.entity_id, snapshot.timestamp),
            pattern: event.name().to_string(),
            entity_id: snapshot.entity_id.clone(),
            kind: snapshot.kind,
            manifest_id: snapshot.manifest_id.clone(),
            staged_fields: snapshot.staged_fields.clone(),
            timestamp: snapshot.timestamp,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Broker confirmation of one publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishAck {
    pub queue: QueueName,
    pub message_id: String,
    /// Broker-assigned sequence number of the delivery.
    pub delivery_tag: u64,
}
