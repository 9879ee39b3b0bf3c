//! Error types for steward-core.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::{EntityId, EntityType, LinkKey};

/// Which uniqueness rule a rejected link insert violated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictKey {
    /// `(org_id, adapter, external_id)` already linked.
    External(LinkKey),
    /// The entity already has a link for this `(org_id, adapter)`.
    Entity {
        key: LinkKey,
        entity_type: EntityType,
        entity_id: EntityId,
    },
}

impl ConflictKey {
    pub fn link_key(&self) -> &LinkKey {
        match self {
            ConflictKey::External(key) | ConflictKey::Entity { key, .. } => key,
        }
    }
}

impl std::fmt::Display for ConflictKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConflictKey::External(key) => write!(f, "external record {key} is already linked"),
            ConflictKey::Entity {
                key,
                entity_type,
                entity_id,
            } => write!(
                f,
                "{entity_type} {entity_id} is already linked in {}/{}",
                key.org_id, key.adapter
            ),
        }
    }
}

/// All errors that can arise from registry, store, and config operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Insert rejected by a uniqueness rule. Callers treat this as
    /// "already linked", not as a hard failure.
    #[error("conflict: {0}")]
    Conflict(ConflictKey),

    /// The backing store could not serve the request (lock poisoned,
    /// connection lost). Transient from the caller's point of view.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Underlying I/O failure.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Snapshot JSON error.
    #[error("snapshot JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Config or snapshot parse error on load, with the offending path.
    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    /// `dirs::home_dir()` returned `None`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,
}

impl RegistryError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, RegistryError::Conflict(_))
    }
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> RegistryError {
    RegistryError::Io {
        path: path.into(),
        source,
    }
}
