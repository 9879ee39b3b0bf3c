//! Error types for steward-adapter.

use thiserror::Error;

use steward_core::{AdapterKind, EntityType};

use crate::manifest::Method;

/// Errors an adapter capability reports back to the sync layer.
///
/// Variants are tags, not strings: the orchestrator picks a retry policy by
/// variant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdapterError {
    /// Network or HTTP failure talking to the external system.
    #[error("fetch error on {route}: {message}")]
    Fetch {
        route: String,
        status: Option<u16>,
        message: String,
    },

    /// An external payload could not be mapped to or from the canonical shape.
    #[error("transform error for {entity_type}: {message}")]
    Transform {
        entity_type: EntityType,
        message: String,
    },

    /// The external system has no record with this id.
    #[error("{entity_type} '{id}' not found in external system")]
    EntityNotFound { entity_type: EntityType, id: String },

    /// No capability is registered for the requested tag.
    #[error("unsupported adapter '{tag}'; expected one of: {choices}")]
    Unsupported { tag: String, choices: String },

    /// The adapter's manifest has no such method for the entity type.
    #[error("{adapter} does not support {method} on {entity_type}")]
    UnsupportedOperation {
        adapter: AdapterKind,
        entity_type: EntityType,
        method: Method,
    },
}

impl AdapterError {
    pub fn fetch(route: impl Into<String>, message: impl Into<String>) -> Self {
        AdapterError::Fetch {
            route: route.into(),
            status: None,
            message: message.into(),
        }
    }

    pub fn transform(entity_type: &EntityType, message: impl Into<String>) -> Self {
        AdapterError::Transform {
            entity_type: entity_type.clone(),
            message: message.into(),
        }
    }
}

/// Errors from resolving canonical names (tables, entity types, webhook
/// events) to adapter endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DetectError {
    #[error("no canonical entity is stored in table '{table}'")]
    UnknownTable { table: String },

    #[error("{adapter} has no endpoint for entity type '{entity_type}'")]
    UnknownEntityType {
        adapter: AdapterKind,
        entity_type: EntityType,
    },

    #[error("{adapter} webhook event '{event_type}' does not match any endpoint")]
    UnknownEvent {
        adapter: AdapterKind,
        event_type: String,
    },
}
