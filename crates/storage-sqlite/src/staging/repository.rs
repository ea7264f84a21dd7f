use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::SqliteConnection;
use log::{debug, warn};

use livesync_core::errors::{Error, Result};
use livesync_core::staging::{
    EntityKind, StagedEntity, StagedEntityFilter, StagedEntityRepositoryTrait, StagingStatus,
    StatusChange, SyncSnapshot, UndecodableRow,
};

use super::model::StagedEntityDB;
use crate::db::{get_connection, DbPool, WriteHandle};
use crate::errors::{IntoCore, StorageError};
use crate::schema::staged_entities;

pub struct StagedEntityRepository {
    pool: Arc<DbPool>,
    writer: WriteHandle,
}

impl StagedEntityRepository {
    pub fn new(pool: Arc<DbPool>, writer: WriteHandle) -> Self {
        StagedEntityRepository { pool, writer }
    }

    fn find(
        conn: &mut SqliteConnection,
        entity_kind: EntityKind,
        entity_id: &str,
    ) -> Result<Option<StagedEntity>> {
        let row = staged_entities::table
            .filter(staged_entities::kind.eq(entity_kind.as_str()))
            .filter(staged_entities::id.eq(entity_id))
            .select(StagedEntityDB::as_select())
            .first::<StagedEntityDB>(conn)
            .optional()
            .into_core()?;
        row.map(StagedEntity::try_from).transpose().into_core()
    }

    fn into_entities(rows: Vec<StagedEntityDB>) -> Result<Vec<StagedEntity>> {
        rows.into_iter()
            .map(StagedEntity::try_from)
            .collect::<std::result::Result<Vec<_>, StorageError>>()
            .into_core()
    }

    /// Decodes rows one by one; a corrupt row is reported, not fatal.
    fn decode_snapshot(rows: Vec<StagedEntityDB>, snapshot: &mut SyncSnapshot) {
        for row in rows {
            let (row_kind, row_id, row_status) =
                (row.kind.clone(), row.id.clone(), row.status.clone());
            match StagedEntity::try_from(row) {
                Ok(entity) => snapshot.entities.push(entity),
                Err(e) => {
                    warn!(
                        "Undecodable {} '{}' in staged_entities: {}",
                        row_kind, row_id, e
                    );
                    snapshot.undecodable.push(UndecodableRow {
                        kind: row_kind,
                        id: row_id,
                        status: row_status,
                        reason: e.to_string(),
                    });
                }
            }
        }
    }
}

#[async_trait]
impl StagedEntityRepositoryTrait for StagedEntityRepository {
    fn get(&self, entity_kind: EntityKind, entity_id: &str) -> Result<StagedEntity> {
        let mut conn = get_connection(&self.pool)?;
        Self::find(&mut conn, entity_kind, entity_id)?
            .ok_or_else(|| Error::not_found(entity_kind, entity_id))
    }

    fn exists(&self, entity_kind: EntityKind, entity_id: &str) -> Result<bool> {
        let mut conn = get_connection(&self.pool)?;
        let found = staged_entities::table
            .filter(staged_entities::kind.eq(entity_kind.as_str()))
            .filter(staged_entities::id.eq(entity_id))
            .select(staged_entities::id)
            .first::<String>(&mut conn)
            .optional()
            .into_core()?;
        Ok(found.is_some())
    }

    fn list(
        &self,
        entity_kind: EntityKind,
        filter: &StagedEntityFilter,
    ) -> Result<Vec<StagedEntity>> {
        let mut conn = get_connection(&self.pool)?;
        let mut query = staged_entities::table
            .filter(staged_entities::kind.eq(entity_kind.as_str()))
            .into_boxed();

        if let Some(wanted) = filter.status {
            query = query.filter(staged_entities::status.eq(wanted.as_str()));
        }
        if let Some(owner) = filter.manifest_id.as_deref() {
            query = query.filter(staged_entities::manifest_id.eq(owner));
        }

        let rows = query
            .order((staged_entities::staged_at.asc(), staged_entities::id.asc()))
            .limit(filter.page_size() as i64)
            .offset(filter.page_offset() as i64)
            .select(StagedEntityDB::as_select())
            .load::<StagedEntityDB>(&mut conn)
            .into_core()?;
        Self::into_entities(rows)
    }

    fn snapshot(&self, as_of: DateTime<Utc>) -> Result<SyncSnapshot> {
        let mut conn = get_connection(&self.pool)?;
        let cutoff = as_of.naive_utc();
        let synced = StagingStatus::Synced.as_str();
        let (rows, manifest_ids, synced_count) = conn
            .transaction::<_, StorageError, _>(|c| {
                let rows = staged_entities::table
                    .filter(staged_entities::created_at.le(cutoff))
                    .filter(staged_entities::status.ne(synced))
                    .order((
                        staged_entities::created_at.asc(),
                        staged_entities::kind.asc(),
                        staged_entities::id.asc(),
                    ))
                    .select(StagedEntityDB::as_select())
                    .load::<StagedEntityDB>(c)?;
                let manifest_ids = staged_entities::table
                    .filter(staged_entities::created_at.le(cutoff))
                    .filter(staged_entities::kind.eq(EntityKind::Manifest.as_str()))
                    .select(staged_entities::id)
                    .load::<String>(c)?;
                let synced_count = staged_entities::table
                    .filter(staged_entities::created_at.le(cutoff))
                    .filter(staged_entities::status.eq(synced))
                    .count()
                    .get_result::<i64>(c)?;
                Ok((rows, manifest_ids, synced_count))
            })
            .into_core()?;

        let mut snapshot = SyncSnapshot {
            manifest_ids: manifest_ids.into_iter().collect(),
            synced: synced_count as usize,
            ..Default::default()
        };
        Self::decode_snapshot(rows, &mut snapshot);
        Ok(snapshot)
    }

    async fn insert(&self, entity: StagedEntity) -> Result<StagedEntity> {
        let row = StagedEntityDB::try_from(&entity).into_core()?;
        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<StagedEntity> {
                let saved = diesel::insert_into(staged_entities::table)
                    .values(&row)
                    .returning(StagedEntityDB::as_returning())
                    .get_result(conn)
                    .into_core()?;
                StagedEntity::try_from(saved).into_core()
            })
            .await
    }

    async fn update_status(
        &self,
        entity_kind: EntityKind,
        entity_id: &str,
        change: StatusChange,
    ) -> Result<StagedEntity> {
        let entity_id = entity_id.to_string();
        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<StagedEntity> {
                let current = Self::find(conn, entity_kind, &entity_id)?
                    .ok_or_else(|| Error::not_found(entity_kind, entity_id.as_str()))?;
                if current.status != change.from {
                    return Err(Error::InvalidTransition {
                        kind: entity_kind,
                        id: entity_id,
                        from: current.status,
                        to: change.to,
                    });
                }

                let updated = diesel::update(
                    staged_entities::table
                        .filter(staged_entities::kind.eq(entity_kind.as_str()))
                        .filter(staged_entities::id.eq(&entity_id))
                        .filter(staged_entities::status.eq(change.from.as_str())),
                )
                .set((
                    staged_entities::status.eq(change.to.as_str()),
                    staged_entities::last_error.eq(change.last_error.as_deref()),
                    staged_entities::updated_at.eq(Utc::now().naive_utc()),
                ))
                .returning(StagedEntityDB::as_returning())
                .get_result(conn)
                .into_core()?;

                debug!(
                    "{} '{}' status {} -> {}",
                    entity_kind, entity_id, change.from, change.to
                );
                StagedEntity::try_from(updated).into_core()
            })
            .await
    }
}
