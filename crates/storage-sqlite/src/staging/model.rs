//! Database models for staged entities.

use chrono::{NaiveDateTime, TimeZone, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::errors::StorageError;
use livesync_core::staging::{EntityKind, StagedEntity, StagingStatus};

/// Database row of `staged_entities`.
#[derive(
    Queryable,
    Insertable,
    Selectable,
    PartialEq,
    Serialize,
    Deserialize,
    Debug,
    Clone,
)]
#[diesel(table_name = crate::schema::staged_entities)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[serde(rename_all = "camelCase")]
pub struct StagedEntityDB {
    pub kind: String,
    pub id: String,
    pub manifest_id: Option<String>,
    /// JSON object text.
    pub fields: String,
    pub status: String,
    pub last_error: Option<String>,
    pub created_at: NaiveDateTime,
    pub staged_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl TryFrom<StagedEntityDB> for StagedEntity {
    type Error = StorageError;

    fn try_from(db: StagedEntityDB) -> Result<Self, Self::Error> {
        let kind: EntityKind = db
            .kind
            .parse()
            .map_err(|e| StorageError::SerializationError(format!("{}", e)))?;
        let status: StagingStatus = db
            .status
            .parse()
            .map_err(|e| StorageError::SerializationError(format!("{}", e)))?;
        Ok(Self {
            id: db.id,
            kind,
            manifest_id: db.manifest_id,
            fields: serde_json::from_str(&db.fields)?,
            status,
            last_error: db.last_error,
            created_at: Utc.from_utc_datetime(&db.created_at),
            staged_at: Utc.from_utc_datetime(&db.staged_at),
            updated_at: Utc.from_utc_datetime(&db.updated_at),
        })
    }
}

impl TryFrom<&StagedEntity> for StagedEntityDB {
    type Error = StorageError;

    fn try_from(domain: &StagedEntity) -> Result<Self, Self::Error> {
        Ok(Self {
            kind: domain.kind.as_str().to_string(),
            id: domain.id.clone(),
            manifest_id: domain.manifest_id.clone(),
            fields: serde_json::to_string(&domain.fields)?,
            status: domain.status.as_str().to_string(),
            last_error: domain.last_error.clone(),
            created_at: domain.created_at.naive_utc(),
            staged_at: domain.staged_at.naive_utc(),
            updated_at: domain.updated_at.naive_utc(),
        })
    }
}
