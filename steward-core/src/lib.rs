//! Steward core library: domain types, the canonical entity catalog, the
//! storage boundary, and the two registries built on it.
//!
//! - [`types`]: identifiers, [`ExternalLink`], [`EntityRelationship`]
//! - [`entity`]: table → entity type / id prefix catalog
//! - [`store`]: [`LinkStore`] / [`RelationshipStore`] and [`MemoryStore`]
//! - [`links`]: [`LinkRegistry`]
//! - [`relationships`]: [`RelationshipRegistry`]
//! - [`config`], [`snapshot`], [`paths`]: `~/.steward/` on disk

pub mod config;
pub mod entity;
pub mod error;
pub mod links;
pub mod paths;
pub mod relationships;
pub mod snapshot;
pub mod store;
pub mod types;

pub use config::Settings;
pub use entity::EntityDescriptor;
pub use error::{ConflictKey, RegistryError};
pub use links::{LinkOutcome, LinkRegistry};
pub use relationships::RelationshipRegistry;
pub use snapshot::StoreSnapshot;
pub use store::{LinkStore, MemoryStore, RelationshipStore};
pub use types::{
    AdapterKind, EntityId, EntityRelationship, EntityType, ExternalId, ExternalLink, LinkGuard,
    LinkKey, LinkPatch, OrgId, RelationshipPair, TokenKey,
};
