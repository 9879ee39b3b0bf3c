//! Name resolution: canonical table names and webhook events to the entity
//! types the adapters know about.

use steward_core::entity::{self, EntityDescriptor};
use steward_core::EntityType;

use crate::error::DetectError;
use crate::manifest::Manifest;

/// Descriptor for a canonical table, e.g. `people` → `person` / `per`.
pub fn detect_table(table: &str) -> Result<&'static EntityDescriptor, DetectError> {
    entity::by_table(table).ok_or_else(|| DetectError::UnknownTable {
        table: table.to_owned(),
    })
}

/// Entity type a webhook event targets in `manifest`, checked against the
/// canonical catalog.
pub fn detect_event(
    manifest: &Manifest,
    event_type: &str,
) -> Result<&'static EntityDescriptor, DetectError> {
    let entity_type = manifest.entity_for_event(event_type)?;
    descriptor_for(manifest, &entity_type)
}

/// Descriptor for an entity type the adapter exposes.
pub fn descriptor_for(
    manifest: &Manifest,
    entity_type: &EntityType,
) -> Result<&'static EntityDescriptor, DetectError> {
    manifest.endpoint(entity_type)?;
    entity::by_entity_type(entity_type).ok_or_else(|| DetectError::UnknownEntityType {
        adapter: manifest.adapter(),
        entity_type: entity_type.clone(),
    })
}
