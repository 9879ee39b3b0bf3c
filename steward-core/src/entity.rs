//! Canonical entity catalog.
//!
//! Maps canonical table names to entity types and the prefix every canonical
//! [`EntityId`] of that type carries (`per_…`, `grp_…`).

use uuid::Uuid;

use crate::types::{AdapterKind, EntityId, EntityType, ExternalId, OrgId};

/// Namespace for deterministic (v5) entity ids.
const ENTITY_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2a9e_4b7d_4e0a_9c35_d2f8_1e6b_7a40);

/// Static description of one canonical entity kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityDescriptor {
    pub table: &'static str,
    pub entity_type: &'static str,
    pub prefix: &'static str,
}

impl EntityDescriptor {
    pub fn entity_type(&self) -> EntityType {
        EntityType::from(self.entity_type)
    }

    /// Whether `id` already carries this descriptor's `<prefix>_`.
    pub fn owns(&self, id: &str) -> bool {
        id.strip_prefix(self.prefix)
            .and_then(|rest| rest.strip_prefix('_'))
            .is_some_and(|rest| !rest.is_empty())
    }
}

pub const CATALOG: &[EntityDescriptor] = &[
    EntityDescriptor { table: "people", entity_type: "person", prefix: "per" },
    EntityDescriptor { table: "households", entity_type: "household", prefix: "hh" },
    EntityDescriptor { table: "emails", entity_type: "email", prefix: "eml" },
    EntityDescriptor { table: "phone_numbers", entity_type: "phone_number", prefix: "phn" },
    EntityDescriptor { table: "addresses", entity_type: "address", prefix: "addr" },
    EntityDescriptor { table: "campuses", entity_type: "campus", prefix: "cmp" },
    EntityDescriptor { table: "groups", entity_type: "group", prefix: "grp" },
    EntityDescriptor { table: "group_memberships", entity_type: "group_membership", prefix: "gm" },
    EntityDescriptor { table: "events", entity_type: "event", prefix: "evt" },
];

pub fn by_table(table: &str) -> Option<&'static EntityDescriptor> {
    CATALOG.iter().find(|d| d.table == table)
}

pub fn by_entity_type(entity_type: &EntityType) -> Option<&'static EntityDescriptor> {
    CATALOG.iter().find(|d| d.entity_type == entity_type.as_str())
}

impl EntityId {
    /// Canonical id for a caller-supplied primary key.
    ///
    /// Keys that already carry the descriptor's prefix pass through; anything
    /// else is mapped to `<prefix>_<uuid-v5(raw)>` so the same raw key always
    /// yields the same canonical id.
    pub fn canonical(descriptor: &EntityDescriptor, raw: &str) -> Self {
        if descriptor.owns(raw) {
            return Self::from(raw);
        }
        let seed = format!("{}:{raw}", descriptor.entity_type);
        Self(format!(
            "{}_{}",
            descriptor.prefix,
            Uuid::new_v5(&ENTITY_NAMESPACE, seed.as_bytes()).simple()
        ))
    }

    /// Deterministic id for a record first observed in an external system.
    pub fn for_external(
        descriptor: &EntityDescriptor,
        org_id: &OrgId,
        adapter: AdapterKind,
        external_id: &ExternalId,
    ) -> Self {
        let seed = format!(
            "{org_id}:{adapter}:{}:{external_id}",
            descriptor.entity_type
        );
        Self(format!(
            "{}_{}",
            descriptor.prefix,
            Uuid::new_v5(&ENTITY_NAMESPACE, seed.as_bytes()).simple()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("people", "person", "per")]
    #[case("households", "household", "hh")]
    #[case("group_memberships", "group_membership", "gm")]
    #[case("events", "event", "evt")]
    fn table_lookup(#[case] table: &str, #[case] entity_type: &str, #[case] prefix: &str) {
        let d = by_table(table).expect("known table");
        assert_eq!(d.entity_type, entity_type);
        assert_eq!(d.prefix, prefix);
        assert_eq!(by_entity_type(&d.entity_type()), Some(d));
    }

    #[test]
    fn unknown_table_is_none() {
        assert!(by_table("sermons").is_none());
    }

    #[test]
    fn prefixes_are_unique() {
        let mut prefixes: Vec<_> = CATALOG.iter().map(|d| d.prefix).collect();
        prefixes.sort_unstable();
        prefixes.dedup();
        assert_eq!(prefixes.len(), CATALOG.len());
    }

    #[test]
    fn canonical_keeps_prefixed_ids() {
        let people = by_table("people").unwrap();
        assert_eq!(EntityId::canonical(people, "per_abc").as_str(), "per_abc");
    }

    #[test]
    fn canonical_maps_foreign_keys_deterministically() {
        let people = by_table("people").unwrap();
        let a = EntityId::canonical(people, "person_123");
        let b = EntityId::canonical(people, "person_123");
        assert_eq!(a, b);
        assert!(a.as_str().starts_with("per_"));
        assert_ne!(a, EntityId::canonical(people, "person_124"));
    }

    #[test]
    fn bare_prefix_is_not_owned() {
        let people = by_table("people").unwrap();
        assert!(!people.owns("per_"));
        assert!(!people.owns("perx_1"));
    }

    #[test]
    fn external_ids_differ_per_org() {
        let people = by_table("people").unwrap();
        let ext = ExternalId::from("77");
        let a = EntityId::for_external(people, &OrgId::from("a"), AdapterKind::Pco, &ext);
        let b = EntityId::for_external(people, &OrgId::from("b"), AdapterKind::Pco, &ext);
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("per_"));
    }
}
