//! Entity Relationship Type Registry.
//!
//! Aggregates, per organization, which entity types have been observed as
//! related. Rows only ever grow: each write is a set union performed by the
//! store, so concurrent writers cannot erase each other's discoveries.
//!
//! This is metadata for consumers (filters, forms, query planners). Callers
//! on the sync path log a failure here and carry on.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::Utc;

use crate::error::RegistryError;
use crate::store::RelationshipStore;
use crate::types::{EntityRelationship, EntityType, OrgId, RelationshipPair};

#[derive(Clone)]
pub struct RelationshipRegistry {
    store: Arc<dyn RelationshipStore>,
}

impl RelationshipRegistry {
    pub fn new(store: Arc<dyn RelationshipStore>) -> Self {
        Self { store }
    }

    /// Merge observed pairs into the registry.
    ///
    /// Pairs are mirrored (`A→B` implies `B→A`), grouped by source, and
    /// upserted as one union per `(org_id, source)`. An empty input (or one
    /// with no targets at all) performs no storage call.
    pub async fn record_relationships(
        &self,
        org_id: &OrgId,
        pairs: &[RelationshipPair],
    ) -> Result<(), RegistryError> {
        let grouped = group_by_source(&expand_bidirectional(pairs));
        if grouped.is_empty() {
            return Ok(());
        }
        let rows = grouped.into_iter().collect::<Vec<_>>();
        tracing::debug!(org = %org_id, rows = rows.len(), "merging relationship rows");
        self.store.merge_targets(org_id, rows, Utc::now()).await
    }

    /// Target types recorded for `source`, lexicographically ordered.
    pub async fn targets_for(
        &self,
        org_id: &OrgId,
        source: &EntityType,
    ) -> Result<BTreeSet<EntityType>, RegistryError> {
        Ok(self
            .store
            .list_relationships(org_id)
            .await?
            .into_iter()
            .find(|row| &row.source_entity_type == source)
            .map(|row| row.target_entity_types)
            .unwrap_or_default())
    }

    pub async fn list(&self, org_id: &OrgId) -> Result<Vec<EntityRelationship>, RegistryError> {
        let mut rows = self.store.list_relationships(org_id).await?;
        rows.sort_by(|a, b| a.source_entity_type.cmp(&b.source_entity_type));
        Ok(rows)
    }
}

/// Flatten pairs into `(source, target)` edges and add every mirror edge.
pub fn expand_bidirectional(pairs: &[RelationshipPair]) -> Vec<(EntityType, EntityType)> {
    let mut edges = Vec::new();
    for pair in pairs {
        for target in &pair.targets {
            edges.push((pair.source.clone(), target.clone()));
            edges.push((target.clone(), pair.source.clone()));
        }
    }
    edges
}

/// Union of targets per source; both levels are ordered.
pub fn group_by_source(
    edges: &[(EntityType, EntityType)],
) -> BTreeMap<EntityType, BTreeSet<EntityType>> {
    let mut grouped: BTreeMap<EntityType, BTreeSet<EntityType>> = BTreeMap::new();
    for (source, target) in edges {
        grouped
            .entry(source.clone())
            .or_default()
            .insert(target.clone());
    }
    grouped
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ty(s: &str) -> EntityType {
        EntityType::from(s)
    }

    #[test]
    fn expansion_mirrors_each_edge() {
        let edges = expand_bidirectional(&[RelationshipPair::new("person", ["household"])]);
        assert_eq!(
            edges,
            vec![(ty("person"), ty("household")), (ty("household"), ty("person"))]
        );
    }

    #[test]
    fn grouping_unions_and_orders_targets() {
        let pairs = [
            RelationshipPair::new("person", ["household", "email"]),
            RelationshipPair::new("group", ["person"]),
        ];
        let grouped = group_by_source(&expand_bidirectional(&pairs));
        let person: Vec<_> = grouped[&ty("person")].iter().map(|t| t.as_str()).collect();
        assert_eq!(person, vec!["email", "group", "household"]);
        assert_eq!(grouped.keys().count(), 4);
    }

    #[test]
    fn pairs_without_targets_group_to_nothing() {
        let grouped = group_by_source(&expand_bidirectional(&[RelationshipPair::new(
            "person",
            Vec::<&str>::new(),
        )]));
        assert!(grouped.is_empty());
    }
}
