//! Domain types shared by every Steward crate.
//!
//! Identifiers are newtypes over `String` so an `EntityId` can never be passed
//! where an `ExternalId` is expected. All types serialize via serde; the
//! newtypes are transparent on the wire.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

macro_rules! string_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

string_newtype!(
    /// Organization that owns a slice of the canonical entity graph.
    OrgId
);
string_newtype!(
    /// Canonical entity type name, e.g. `person` or `group_membership`.
    EntityType
);
string_newtype!(
    /// Internal (canonical) entity identifier, always `<prefix>_<suffix>`.
    EntityId
);
string_newtype!(
    /// Identifier of a record inside an external system of record.
    ExternalId
);
string_newtype!(
    /// Key of the credential a sync run is bound to.
    TokenKey
);

// ---------------------------------------------------------------------------
// Adapter tag
// ---------------------------------------------------------------------------

/// External system-of-record an entity can be linked to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdapterKind {
    /// Planning Center Online.
    Pco,
    /// Church Community Builder.
    Ccb,
}

impl AdapterKind {
    pub const ALL: [AdapterKind; 2] = [AdapterKind::Pco, AdapterKind::Ccb];

    pub fn as_str(&self) -> &'static str {
        match self {
            AdapterKind::Pco => "pco",
            AdapterKind::Ccb => "ccb",
        }
    }

    /// Comma-separated list of accepted tags, for error messages.
    pub fn choices() -> String {
        Self::ALL
            .iter()
            .map(AdapterKind::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for AdapterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when parsing an adapter tag that is not in [`AdapterKind::ALL`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownAdapter(pub String);

impl fmt::Display for UnknownAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unknown adapter '{}'; expected one of: {}",
            self.0,
            AdapterKind::choices()
        )
    }
}

impl std::error::Error for UnknownAdapter {}

impl FromStr for AdapterKind {
    type Err = UnknownAdapter;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pco" => Ok(AdapterKind::Pco),
            "ccb" => Ok(AdapterKind::Ccb),
            _ => Err(UnknownAdapter(s.to_owned())),
        }
    }
}

// ---------------------------------------------------------------------------
// External links
// ---------------------------------------------------------------------------

/// One known correspondence between an internal entity and an external record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalLink {
    pub org_id: OrgId,
    pub adapter: AdapterKind,
    pub entity_type: EntityType,
    pub entity_id: EntityId,
    pub external_id: ExternalId,
    /// In-flight flag; set while a sync run holds a claim on the record.
    #[serde(default)]
    pub syncing: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExternalLink {
    /// A fresh, idle link stamped with `now`.
    pub fn new(
        org_id: OrgId,
        adapter: AdapterKind,
        entity_type: EntityType,
        entity_id: EntityId,
        external_id: ExternalId,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            org_id,
            adapter,
            entity_type,
            entity_id,
            external_id,
            syncing: false,
            last_processed_at: Some(now),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn key(&self) -> LinkKey {
        LinkKey {
            org_id: self.org_id.clone(),
            adapter: self.adapter,
            external_id: self.external_id.clone(),
        }
    }
}

/// Unique key of a link: `(org_id, adapter, external_id)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LinkKey {
    pub org_id: OrgId,
    pub adapter: AdapterKind,
    pub external_id: ExternalId,
}

impl fmt::Display for LinkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.org_id, self.adapter, self.external_id)
    }
}

/// Partial update of a link. Identity fields are not representable here.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkPatch {
    pub syncing: Option<bool>,
    pub last_processed_at: Option<DateTime<Utc>>,
}

impl LinkPatch {
    pub fn in_progress(now: DateTime<Utc>) -> Self {
        Self {
            syncing: Some(true),
            last_processed_at: Some(now),
        }
    }

    pub fn completed(now: DateTime<Utc>) -> Self {
        Self {
            syncing: Some(false),
            last_processed_at: Some(now),
        }
    }

    /// Clears the in-flight flag and leaves `last_processed_at` at whatever
    /// the claim stamped.
    pub fn released() -> Self {
        Self {
            syncing: Some(false),
            last_processed_at: None,
        }
    }
}

/// Row condition a store checks in the same atomic step that applies a
/// patch. Rows failing the guard are left untouched and not returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkGuard {
    /// Idle, or claimed (stamped) before `cutoff`.
    Claimable { cutoff: DateTime<Utc> },
    /// Still claimed, and stamped before `cutoff`.
    Stuck { cutoff: DateTime<Utc> },
}

impl LinkGuard {
    pub fn admits(&self, link: &ExternalLink) -> bool {
        let stamped = link.last_processed_at.unwrap_or(link.updated_at);
        match *self {
            LinkGuard::Claimable { cutoff } => !link.syncing || stamped < cutoff,
            LinkGuard::Stuck { cutoff } => link.syncing && stamped < cutoff,
        }
    }
}

// ---------------------------------------------------------------------------
// Relationships
// ---------------------------------------------------------------------------

/// Accumulated set of entity types observed as related to `source_entity_type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRelationship {
    pub org_id: OrgId,
    pub source_entity_type: EntityType,
    pub target_entity_types: BTreeSet<EntityType>,
    pub updated_at: DateTime<Utc>,
}

/// One observation fed into the relationship registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipPair {
    pub source: EntityType,
    pub targets: Vec<EntityType>,
}

impl RelationshipPair {
    pub fn new<I, T>(source: impl Into<EntityType>, targets: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<EntityType>,
    {
        Self {
            source: source.into(),
            targets: targets.into_iter().map(Into::into).collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
