//! Writer into the internal canonical graph.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use steward_adapter::CanonicalRecord;
use steward_core::{EntityId, EntityType, OrgId};

use crate::error::SinkError;

#[async_trait]
pub trait EntitySink: Send + Sync {
    /// Insert or replace the canonical row for `entity_id`.
    async fn upsert(
        &self,
        org_id: &OrgId,
        entity_id: &EntityId,
        record: &CanonicalRecord,
    ) -> Result<(), SinkError>;

    /// Remove the canonical row. Removing an absent row is not an error.
    async fn remove(
        &self,
        org_id: &OrgId,
        entity_type: &EntityType,
        entity_id: &EntityId,
    ) -> Result<(), SinkError>;
}

/// [`EntitySink`] over a map, for tests and local runs.
#[derive(Default)]
pub struct MemorySink {
    rows: Mutex<BTreeMap<(OrgId, EntityId), CanonicalRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, org_id: &OrgId, entity_id: &EntityId) -> Option<CanonicalRecord> {
        self.rows
            .lock()
            .ok()?
            .get(&(org_id.clone(), entity_id.clone()))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().map(|rows| rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl EntitySink for MemorySink {
    async fn upsert(
        &self,
        org_id: &OrgId,
        entity_id: &EntityId,
        record: &CanonicalRecord,
    ) -> Result<(), SinkError> {
        let mut rows = self
            .rows
            .lock()
            .map_err(|_| SinkError::Unavailable("sink lock poisoned".into()))?;
        rows.insert((org_id.clone(), entity_id.clone()), record.clone());
        Ok(())
    }

    async fn remove(
        &self,
        org_id: &OrgId,
        _entity_type: &EntityType,
        entity_id: &EntityId,
    ) -> Result<(), SinkError> {
        let mut rows = self
            .rows
            .lock()
            .map_err(|_| SinkError::Unavailable("sink lock poisoned".into()))?;
        rows.remove(&(org_id.clone(), entity_id.clone()));
        Ok(())
    }
}
