//! The capability every external system of record is reached through.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use steward_core::{AdapterKind, EntityType, ExternalId, TokenKey};

use crate::error::AdapterError;
use crate::manifest::Manifest;

// ---------------------------------------------------------------------------
// Call envelopes
// ---------------------------------------------------------------------------

/// Rate-limit bucket the external API reported on a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketHint {
    pub bucket: String,
    pub limit: u32,
    pub reset_after: Duration,
}

/// A response value plus whatever throttling hint came with it.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply<T> {
    pub value: T,
    pub bucket: Option<BucketHint>,
}

impl<T> Reply<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            bucket: None,
        }
    }

    pub fn with_bucket(mut self, hint: Option<BucketHint>) -> Self {
        self.bucket = hint;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListParams {
    pub page_size: usize,
    /// Opaque continuation token from the previous [`Page`].
    pub cursor: Option<String>,
}

impl ListParams {
    pub fn first(page_size: usize) -> Self {
        Self {
            page_size,
            cursor: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub records: Vec<ExternalRecord>,
    pub next_cursor: Option<String>,
}

/// A record in the external system's own shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalRecord {
    pub id: ExternalId,
    pub data: Value,
}

/// A record translated into the internal canonical shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub entity_type: EntityType,
    pub external_id: ExternalId,
    pub attributes: Value,
    /// Entity types this record was seen referencing.
    #[serde(default)]
    pub related: BTreeSet<EntityType>,
}

// ---------------------------------------------------------------------------
// Capability
// ---------------------------------------------------------------------------

/// One connected external system, bound to a single credential.
///
/// Implementations must not throttle themselves: the sync layer calls
/// the limiter before every request and feeds [`Reply::bucket`] back into it.
#[async_trait]
pub trait Adapter: Send + Sync {
    fn kind(&self) -> AdapterKind;

    fn manifest(&self) -> &Manifest;

    async fn list(
        &self,
        entity_type: &EntityType,
        params: ListParams,
    ) -> Result<Reply<Page>, AdapterError>;

    /// Single record by id. `None` when the external system has no such record.
    async fn fetch(
        &self,
        entity_type: &EntityType,
        id: &ExternalId,
    ) -> Result<Reply<Option<ExternalRecord>>, AdapterError>;

    async fn create(
        &self,
        entity_type: &EntityType,
        payload: Value,
    ) -> Result<Reply<ExternalRecord>, AdapterError>;

    async fn update(
        &self,
        entity_type: &EntityType,
        id: &ExternalId,
        payload: Value,
    ) -> Result<Reply<ExternalRecord>, AdapterError>;

    async fn delete(&self, entity_type: &EntityType, id: &ExternalId)
        -> Result<Reply<()>, AdapterError>;

    /// Inbound transform.
    fn to_canonical(
        &self,
        entity_type: &EntityType,
        record: &ExternalRecord,
    ) -> Result<CanonicalRecord, AdapterError>;

    /// Outbound transform of a canonical row into a request payload.
    fn to_external(&self, entity_type: &EntityType, value: &Value) -> Result<Value, AdapterError>;
}

/// Builds an [`Adapter`] for a stored credential.
#[async_trait]
pub trait AdapterFactory: Send + Sync {
    fn kind(&self) -> AdapterKind;

    async fn connect(&self, token_key: &TokenKey) -> Result<Arc<dyn Adapter>, AdapterError>;
}

/// Factory that hands out the same adapter for every credential.
pub struct FixedFactory {
    adapter: Arc<dyn Adapter>,
}

impl FixedFactory {
    pub fn new(adapter: Arc<dyn Adapter>) -> Self {
        Self { adapter }
    }
}

#[async_trait]
impl AdapterFactory for FixedFactory {
    fn kind(&self) -> AdapterKind {
        self.adapter.kind()
    }

    async fn connect(&self, _token_key: &TokenKey) -> Result<Arc<dyn Adapter>, AdapterError> {
        Ok(self.adapter.clone())
    }
}
