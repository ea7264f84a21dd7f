//! In-memory doubles shared by the unit tests of this crate.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::{DatabaseError, Error, Result};
use crate::publishing::{MessagePublisherTrait, PublishAck, QueueName, StageMessage};
use crate::staging::{
    EntityKind, StagedEntity, StagedEntityFilter, StagedEntityRepositoryTrait, StagingStatus,
    StatusChange, SyncSnapshot, UndecodableRow,
};

#[derive(Clone, Default)]
pub struct MockStagedEntityRepository {
    entities: Arc<Mutex<Vec<StagedEntity>>>,
    undecodable: Arc<Mutex<Vec<UndecodableRow>>>,
    failing_writes: Arc<AtomicU32>,
    inserts: Arc<AtomicU32>,
}

impl MockStagedEntityRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, entity: StagedEntity) {
        self.entities.lock().unwrap().push(entity);
    }

    /// A stored row the snapshot reports as undecodable.
    pub fn seed_undecodable(&self, row: UndecodableRow) {
        self.undecodable.lock().unwrap().push(row);
    }

    pub fn set_status(&self, kind: EntityKind, id: &str, status: StagingStatus) {
        let mut entities = self.entities.lock().unwrap();
        if let Some(e) = entities.iter_mut().find(|e| e.kind == kind && e.id == id) {
            e.status = status;
        }
    }

    /// The next `n` writes fail with `StoreUnavailable`.
    pub fn fail_next_writes(&self, n: u32) {
        self.failing_writes.store(n, Ordering::SeqCst);
    }

    pub fn insert_count(&self) -> u32 {
        self.inserts.load(Ordering::SeqCst)
    }

    pub fn status_of(&self, kind: EntityKind, id: &str) -> Option<StagingStatus> {
        self.entities
            .lock()
            .unwrap()
            .iter()
            .find(|e| e.kind == kind && e.id == id)
            .map(|e| e.status)
    }

    fn take_write_fault(&self) -> Result<()> {
        let remaining = self.failing_writes.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_writes.store(remaining - 1, Ordering::SeqCst);
            return Err(Error::StoreUnavailable("injected write fault".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl StagedEntityRepositoryTrait for MockStagedEntityRepository {
    fn get(&self, kind: EntityKind, id: &str) -> Result<StagedEntity> {
        self.entities
            .lock()
            .unwrap()
            .iter()
            .find(|e| e.kind == kind && e.id == id)
            .cloned()
            .ok_or_else(|| Error::not_found(kind, id))
    }

    fn exists(&self, kind: EntityKind, id: &str) -> Result<bool> {
        Ok(self
            .entities
            .lock()
            .unwrap()
            .iter()
            .any(|e| e.kind == kind && e.id == id))
    }

    fn list(&self, kind: EntityKind, filter: &StagedEntityFilter) -> Result<Vec<StagedEntity>> {
        Ok(self
            .entities
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.kind == kind && filter.matches(e))
            .skip(filter.page_offset())
            .take(filter.page_size())
            .cloned()
            .collect())
    }

    fn snapshot(&self, as_of: DateTime<Utc>) -> Result<SyncSnapshot> {
        let entities = self.entities.lock().unwrap();
        let mut snapshot = SyncSnapshot {
            undecodable: self.undecodable.lock().unwrap().clone(),
            ..Default::default()
        };
        for entity in entities.iter().filter(|e| e.created_at <= as_of) {
            if entity.kind == EntityKind::Manifest {
                snapshot.manifest_ids.insert(entity.id.clone());
            }
            if entity.status == StagingStatus::Synced {
                snapshot.synced += 1;
            } else {
                snapshot.entities.push(entity.clone());
            }
        }
        Ok(snapshot)
    }

    async fn insert(&self, entity: StagedEntity) -> Result<StagedEntity> {
        self.take_write_fault()?;
        let mut entities = self.entities.lock().unwrap();
        if entities
            .iter()
            .any(|e| e.kind == entity.kind && e.id == entity.id)
        {
            return Err(DatabaseError::UniqueViolation(entity.id).into());
        }
        self.inserts.fetch_add(1, Ordering::SeqCst);
        entities.push(entity.clone());
        Ok(entity)
    }

    async fn update_status(
        &self,
        kind: EntityKind,
        id: &str,
        change: StatusChange,
    ) -> Result<StagedEntity> {
        self.take_write_fault()?;
        let mut entities = self.entities.lock().unwrap();
        let entity = entities
            .iter_mut()
            .find(|e| e.kind == kind && e.id == id)
            .ok_or_else(|| Error::not_found(kind, id))?;
        if entity.status != change.from {
            return Err(Error::InvalidTransition {
                kind,
                id: id.to_string(),
                from: entity.status,
                to: change.to,
            });
        }
        entity.status = change.to;
        entity.last_error = change.last_error;
        entity.updated_at = Utc::now();
        Ok(entity.clone())
    }
}

/// Scripted broker behaviour for one publish call.
#[derive(Clone, Copy, Debug)]
pub enum PublishScript {
    Ack,
    GatewayDown,
    Unconfirmed,
    /// Never completes; exercises the publish deadline.
    Hang,
}

#[derive(Clone, Default)]
pub struct MockMessagePublisher {
    script: Arc<Mutex<VecDeque<PublishScript>>>,
    published: Arc<Mutex<Vec<(QueueName, StageMessage)>>>,
    attempts: Arc<AtomicU32>,
}

impl MockMessagePublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues outcomes for the next calls. Once exhausted every call acks.
    pub fn script(&self, outcomes: impl IntoIterator<Item = PublishScript>) {
        self.script.lock().unwrap().extend(outcomes);
    }

    pub fn published(&self) -> Vec<(QueueName, StageMessage)> {
        self.published.lock().unwrap().clone()
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessagePublisherTrait for MockMessagePublisher {
    async fn publish(&self, queue: QueueName, message: &StageMessage) -> Result<PublishAck> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let next = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(PublishScript::Ack);
        match next {
            PublishScript::Ack => {
                self.published
                    .lock()
                    .unwrap()
                    .push((queue, message.clone()));
                Ok(PublishAck {
                    queue,
                    message_id: message.message_id.clone(),
                    delivery_tag: u64::from(attempt),
                })
            }
            PublishScript::GatewayDown => {
                Err(Error::GatewayUnavailable("broker offline".to_string()))
            }
            PublishScript::Unconfirmed => {
                Err(Error::PublishUnconfirmed("confirm lost".to_string()))
            }
            PublishScript::Hang => std::future::pending().await,
        }
    }
}
