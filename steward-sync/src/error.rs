//! Error types for steward-sync.
//!
//! [`SyncError`] variants are the failure tags workflows report. The
//! orchestrator decides retries from [`SyncError::is_retryable`], never from
//! message text.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use steward_adapter::{AdapterError, DetectError, Method};
use steward_core::{AdapterKind, EntityId, EntityType, RegistryError};

/// The limiter's counter store could not be reached. The limiter fails
/// closed and does not retry internally.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LimiterError {
    #[error("rate limiter counter store unavailable: {0}")]
    Unavailable(String),
}

/// Errors writing into the internal canonical graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SinkError {
    #[error("could not write {entity_type} '{entity_id}': {message}")]
    Write {
        entity_type: EntityType,
        entity_id: EntityId,
        message: String,
    },

    #[error("entity sink unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("{entity_type} '{id}' not found")]
    EntityNotFound { entity_type: EntityType, id: String },

    #[error(transparent)]
    Fetch(AdapterError),

    #[error(transparent)]
    Transform(AdapterError),

    #[error("relationship processing failed: {0}")]
    RelationshipProcessing(#[source] RegistryError),

    #[error("link lookup failed: {0}")]
    LinkRetrieval(#[source] RegistryError),

    #[error("link write failed: {0}")]
    LinkUpsert(#[source] RegistryError),

    #[error(transparent)]
    RateLimiter(#[from] LimiterError),

    #[error("activity '{activity}' timed out after {}s", after.as_secs())]
    Timeout { activity: String, after: Duration },

    #[error("unsupported adapter '{tag}'; expected one of: {choices}")]
    UnsupportedAdapter { tag: String, choices: String },

    #[error("{adapter} does not support {method} on {entity_type}")]
    UnsupportedOperation {
        adapter: AdapterKind,
        entity_type: EntityType,
        method: Method,
    },

    #[error(transparent)]
    Detection(#[from] DetectError),

    #[error(transparent)]
    EntityWrite(#[from] SinkError),

    /// The run ledger (durable substrate client) failed.
    #[error("workflow substrate error: {0}")]
    Substrate(String),
}

/// Serializable failure tag, one per [`SyncError`] variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    EntityNotFound,
    Fetch,
    Transform,
    RelationshipProcessing,
    LinkRetrieval,
    LinkUpsert,
    RateLimiter,
    Timeout,
    UnsupportedAdapter,
    UnsupportedOperation,
    Detection,
    EntityWrite,
    Substrate,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::EntityNotFound => "entity_not_found",
            ErrorKind::Fetch => "fetch",
            ErrorKind::Transform => "transform",
            ErrorKind::RelationshipProcessing => "relationship_processing",
            ErrorKind::LinkRetrieval => "link_retrieval",
            ErrorKind::LinkUpsert => "link_upsert",
            ErrorKind::RateLimiter => "rate_limiter",
            ErrorKind::Timeout => "timeout",
            ErrorKind::UnsupportedAdapter => "unsupported_adapter",
            ErrorKind::UnsupportedOperation => "unsupported_operation",
            ErrorKind::Detection => "detection",
            ErrorKind::EntityWrite => "entity_write",
            ErrorKind::Substrate => "substrate",
        }
    }

    /// Transient failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::Fetch | ErrorKind::RateLimiter | ErrorKind::Timeout
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::EntityNotFound { .. } => ErrorKind::EntityNotFound,
            SyncError::Fetch(_) => ErrorKind::Fetch,
            SyncError::Transform(_) => ErrorKind::Transform,
            SyncError::RelationshipProcessing(_) => ErrorKind::RelationshipProcessing,
            SyncError::LinkRetrieval(_) => ErrorKind::LinkRetrieval,
            SyncError::LinkUpsert(_) => ErrorKind::LinkUpsert,
            SyncError::RateLimiter(_) => ErrorKind::RateLimiter,
            SyncError::Timeout { .. } => ErrorKind::Timeout,
            SyncError::UnsupportedAdapter { .. } => ErrorKind::UnsupportedAdapter,
            SyncError::UnsupportedOperation { .. } => ErrorKind::UnsupportedOperation,
            SyncError::Detection(_) => ErrorKind::Detection,
            SyncError::EntityWrite(_) => ErrorKind::EntityWrite,
            SyncError::Substrate(_) => ErrorKind::Substrate,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

impl From<AdapterError> for SyncError {
    fn from(err: AdapterError) -> Self {
        match err {
            AdapterError::Fetch { .. } => SyncError::Fetch(err),
            AdapterError::Transform { .. } => SyncError::Transform(err),
            AdapterError::EntityNotFound { entity_type, id } => {
                SyncError::EntityNotFound { entity_type, id }
            }
            AdapterError::Unsupported { tag, choices } => {
                SyncError::UnsupportedAdapter { tag, choices }
            }
            AdapterError::UnsupportedOperation {
                adapter,
                entity_type,
                method,
            } => SyncError::UnsupportedOperation {
                adapter,
                entity_type,
                method,
            },
        }
    }
}
