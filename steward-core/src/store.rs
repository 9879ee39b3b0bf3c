//! Storage boundary for links and relationships.
//!
//! The traits describe what the registries need from a relational engine:
//! keyed batch reads, all-or-nothing inserts with conflict detection, partial
//! updates, and a set-union upsert for relationship rows. Every mutation is a
//! single atomic step; no caller does read-modify-write across calls.
//!
//! [`MemoryStore`] implements both traits behind one lock and is what the
//! daemon runs on, persisted through [`crate::snapshot`].

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{ConflictKey, RegistryError};
use crate::snapshot::StoreSnapshot;
use crate::types::{
    AdapterKind, EntityId, EntityRelationship, EntityType, ExternalId, ExternalLink, LinkGuard,
    LinkKey, LinkPatch, OrgId,
};

#[async_trait]
pub trait LinkStore: Send + Sync {
    async fn find_by_external_ids(
        &self,
        org_id: &OrgId,
        adapter: AdapterKind,
        external_ids: &[ExternalId],
    ) -> Result<Vec<ExternalLink>, RegistryError>;

    async fn find_by_entities(
        &self,
        org_id: &OrgId,
        entity_type: &EntityType,
        entity_ids: &[EntityId],
    ) -> Result<Vec<ExternalLink>, RegistryError>;

    /// Insert every link or none. Fails with [`RegistryError::Conflict`] on
    /// the first uniqueness violation, including duplicates inside `links`.
    async fn insert_many(&self, links: Vec<ExternalLink>) -> Result<(), RegistryError>;

    /// Apply `patch` to each existing link and return the updated rows.
    /// Unknown external ids are skipped.
    async fn update_many(
        &self,
        org_id: &OrgId,
        adapter: AdapterKind,
        external_ids: &[ExternalId],
        patch: &LinkPatch,
        now: DateTime<Utc>,
    ) -> Result<Vec<ExternalLink>, RegistryError>;

    /// Conditional form of [`update_many`](Self::update_many): the guard is
    /// evaluated against each row in the same step that patches it, the
    /// equivalent of `UPDATE ... WHERE`. Only patched rows are returned.
    async fn update_many_where(
        &self,
        org_id: &OrgId,
        adapter: AdapterKind,
        external_ids: &[ExternalId],
        guard: LinkGuard,
        patch: &LinkPatch,
        now: DateTime<Utc>,
    ) -> Result<Vec<ExternalLink>, RegistryError>;

    async fn delete(
        &self,
        org_id: &OrgId,
        adapter: AdapterKind,
        external_id: &ExternalId,
    ) -> Result<Option<ExternalLink>, RegistryError>;

    /// All links, optionally restricted to one organization.
    async fn list_links(&self, org_id: Option<&OrgId>) -> Result<Vec<ExternalLink>, RegistryError>;
}

#[async_trait]
pub trait RelationshipStore: Send + Sync {
    /// Upsert one row per `(org_id, source)`, storing the union of the
    /// existing and supplied target sets.
    async fn merge_targets(
        &self,
        org_id: &OrgId,
        rows: Vec<(EntityType, BTreeSet<EntityType>)>,
        now: DateTime<Utc>,
    ) -> Result<(), RegistryError>;

    async fn list_relationships(
        &self,
        org_id: &OrgId,
    ) -> Result<Vec<EntityRelationship>, RegistryError>;
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

type EntityKey = (OrgId, AdapterKind, EntityType, EntityId);

#[derive(Default)]
struct Tables {
    links: BTreeMap<LinkKey, ExternalLink>,
    by_entity: BTreeMap<EntityKey, ExternalId>,
    relationships: BTreeMap<(OrgId, EntityType), EntityRelationship>,
}

impl Tables {
    fn insert_link(&mut self, link: ExternalLink) {
        self.by_entity.insert(entity_key(&link), link.external_id.clone());
        self.links.insert(link.key(), link);
    }
}

fn entity_key(link: &ExternalLink) -> EntityKey {
    (
        link.org_id.clone(),
        link.adapter,
        link.entity_type.clone(),
        link.entity_id.clone(),
    )
}

/// Single-process store with the atomicity of one lock acquisition per call.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    writes: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a store (and its entity index) from a snapshot.
    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        let mut tables = Tables::default();
        for link in snapshot.links {
            tables.insert_link(link);
        }
        for row in snapshot.relationships {
            tables
                .relationships
                .insert((row.org_id.clone(), row.source_entity_type.clone()), row);
        }
        Self {
            tables: Mutex::new(tables),
            writes: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> Result<StoreSnapshot, RegistryError> {
        let tables = self.tables()?;
        Ok(StoreSnapshot::new(
            tables.links.values().cloned().collect(),
            tables.relationships.values().cloned().collect(),
        ))
    }

    /// Number of mutating calls served so far.
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables>, RegistryError> {
        self.tables
            .lock()
            .map_err(|_| RegistryError::Unavailable("memory store lock poisoned".to_string()))
    }

    fn count_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    fn patch_links(
        &self,
        org_id: &OrgId,
        adapter: AdapterKind,
        external_ids: &[ExternalId],
        guard: Option<LinkGuard>,
        patch: &LinkPatch,
        now: DateTime<Utc>,
    ) -> Result<Vec<ExternalLink>, RegistryError> {
        let mut tables = self.tables()?;
        self.count_write();

        let mut updated = Vec::with_capacity(external_ids.len());
        for external_id in external_ids {
            let key = LinkKey {
                org_id: org_id.clone(),
                adapter,
                external_id: external_id.clone(),
            };
            let Some(link) = tables.links.get_mut(&key) else {
                continue;
            };
            if matches!(guard, Some(guard) if !guard.admits(link)) {
                continue;
            }
            if let Some(syncing) = patch.syncing {
                link.syncing = syncing;
            }
            if let Some(at) = patch.last_processed_at {
                link.last_processed_at = Some(at);
            }
            link.updated_at = now;
            updated.push(link.clone());
        }
        Ok(updated)
    }
}

#[async_trait]
impl LinkStore for MemoryStore {
    async fn find_by_external_ids(
        &self,
        org_id: &OrgId,
        adapter: AdapterKind,
        external_ids: &[ExternalId],
    ) -> Result<Vec<ExternalLink>, RegistryError> {
        let tables = self.tables()?;
        Ok(external_ids
            .iter()
            .filter_map(|external_id| {
                tables.links.get(&LinkKey {
                    org_id: org_id.clone(),
                    adapter,
                    external_id: external_id.clone(),
                })
            })
            .cloned()
            .collect())
    }

    async fn find_by_entities(
        &self,
        org_id: &OrgId,
        entity_type: &EntityType,
        entity_ids: &[EntityId],
    ) -> Result<Vec<ExternalLink>, RegistryError> {
        let wanted: BTreeSet<&EntityId> = entity_ids.iter().collect();
        let tables = self.tables()?;
        Ok(tables
            .links
            .values()
            .filter(|l| {
                &l.org_id == org_id && &l.entity_type == entity_type && wanted.contains(&l.entity_id)
            })
            .cloned()
            .collect())
    }

    async fn insert_many(&self, links: Vec<ExternalLink>) -> Result<(), RegistryError> {
        let mut tables = self.tables()?;
        self.count_write();

        let mut batch_keys = BTreeSet::new();
        let mut batch_entities = BTreeSet::new();
        for link in &links {
            let key = link.key();
            if tables.links.contains_key(&key) || !batch_keys.insert(key.clone()) {
                return Err(RegistryError::Conflict(ConflictKey::External(key)));
            }
            let ek = entity_key(link);
            if tables.by_entity.contains_key(&ek) || !batch_entities.insert(ek) {
                return Err(RegistryError::Conflict(ConflictKey::Entity {
                    key,
                    entity_type: link.entity_type.clone(),
                    entity_id: link.entity_id.clone(),
                }));
            }
        }

        for link in links {
            tables.insert_link(link);
        }
        Ok(())
    }

    async fn update_many(
        &self,
        org_id: &OrgId,
        adapter: AdapterKind,
        external_ids: &[ExternalId],
        patch: &LinkPatch,
        now: DateTime<Utc>,
    ) -> Result<Vec<ExternalLink>, RegistryError> {
        self.patch_links(org_id, adapter, external_ids, None, patch, now)
    }

    async fn update_many_where(
        &self,
        org_id: &OrgId,
        adapter: AdapterKind,
        external_ids: &[ExternalId],
        guard: LinkGuard,
        patch: &LinkPatch,
        now: DateTime<Utc>,
    ) -> Result<Vec<ExternalLink>, RegistryError> {
        self.patch_links(org_id, adapter, external_ids, Some(guard), patch, now)
    }

    async fn delete(
        &self,
        org_id: &OrgId,
        adapter: AdapterKind,
        external_id: &ExternalId,
    ) -> Result<Option<ExternalLink>, RegistryError> {
        let mut tables = self.tables()?;
        self.count_write();

        let key = LinkKey {
            org_id: org_id.clone(),
            adapter,
            external_id: external_id.clone(),
        };
        let removed = tables.links.remove(&key);
        if let Some(link) = &removed {
            tables.by_entity.remove(&entity_key(link));
        }
        Ok(removed)
    }

    async fn list_links(&self, org_id: Option<&OrgId>) -> Result<Vec<ExternalLink>, RegistryError> {
        let tables = self.tables()?;
        Ok(tables
            .links
            .values()
            .filter(|l| org_id.map_or(true, |org| &l.org_id == org))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl RelationshipStore for MemoryStore {
    async fn merge_targets(
        &self,
        org_id: &OrgId,
        rows: Vec<(EntityType, BTreeSet<EntityType>)>,
        now: DateTime<Utc>,
    ) -> Result<(), RegistryError> {
        let mut tables = self.tables()?;
        self.count_write();

        for (source, targets) in rows {
            let row = tables
                .relationships
                .entry((org_id.clone(), source.clone()))
                .or_insert_with(|| EntityRelationship {
                    org_id: org_id.clone(),
                    source_entity_type: source,
                    target_entity_types: BTreeSet::new(),
                    updated_at: now,
                });
            row.target_entity_types.extend(targets);
            row.updated_at = now;
        }
        Ok(())
    }

    async fn list_relationships(
        &self,
        org_id: &OrgId,
    ) -> Result<Vec<EntityRelationship>, RegistryError> {
        let tables = self.tables()?;
        Ok(tables
            .relationships
            .values()
            .filter(|r| &r.org_id == org_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link(external: &str, entity: &str) -> ExternalLink {
        ExternalLink::new(
            OrgId::from("org"),
            AdapterKind::Pco,
            EntityType::from("person"),
            EntityId::from(entity),
            ExternalId::from(external),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn insert_many_is_all_or_nothing() {
        let store = MemoryStore::new();
        store.insert_many(vec![link("1", "per_a")]).await.expect("seed");

        let err = store
            .insert_many(vec![link("2", "per_b"), link("1", "per_c")])
            .await
            .unwrap_err();
        assert!(err.is_conflict());

        let all = store.list_links(None).await.expect("list");
        assert_eq!(all.len(), 1, "partial batch must not be applied");
    }

    #[tokio::test]
    async fn duplicates_inside_one_batch_conflict() {
        let store = MemoryStore::new();
        let err = store
            .insert_many(vec![link("1", "per_a"), link("1", "per_b")])
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::Conflict(ConflictKey::External(_))));
    }

    #[tokio::test]
    async fn second_link_for_same_entity_conflicts() {
        let store = MemoryStore::new();
        store.insert_many(vec![link("1", "per_a")]).await.expect("seed");
        let err = store.insert_many(vec![link("2", "per_a")]).await.unwrap_err();
        assert!(matches!(err, RegistryError::Conflict(ConflictKey::Entity { .. })));
    }

    #[tokio::test]
    async fn delete_frees_entity_slot() {
        let store = MemoryStore::new();
        store.insert_many(vec![link("1", "per_a")]).await.expect("seed");
        let removed = store
            .delete(&OrgId::from("org"), AdapterKind::Pco, &ExternalId::from("1"))
            .await
            .expect("delete");
        assert!(removed.is_some());
        store
            .insert_many(vec![link("2", "per_a")])
            .await
            .expect("entity can be relinked after unlink");
    }

    #[tokio::test]
    async fn snapshot_roundtrip_rebuilds_entity_index() {
        let store = MemoryStore::new();
        store.insert_many(vec![link("1", "per_a")]).await.expect("seed");
        let restored = MemoryStore::from_snapshot(store.snapshot().expect("snapshot"));
        let err = restored.insert_many(vec![link("9", "per_a")]).await.unwrap_err();
        assert!(matches!(err, RegistryError::Conflict(ConflictKey::Entity { .. })));
    }

    #[tokio::test]
    async fn guarded_update_skips_rows_claimed_by_someone_else() {
        let store = MemoryStore::new();
        let mut held = link("1", "per_a");
        held.syncing = true;
        store
            .insert_many(vec![held, link("2", "per_b")])
            .await
            .expect("seed");

        let now = Utc::now();
        let guard = LinkGuard::Claimable {
            cutoff: now - chrono::Duration::minutes(15),
        };
        let ids = [ExternalId::from("1"), ExternalId::from("2")];
        let claimed = store
            .update_many_where(
                &OrgId::from("org"),
                AdapterKind::Pco,
                &ids,
                guard,
                &LinkPatch::in_progress(now),
                now,
            )
            .await
            .expect("claim");
        let claimed: Vec<&str> = claimed.iter().map(|l| l.external_id.as_str()).collect();
        assert_eq!(claimed, vec!["2"]);

        let again = store
            .update_many_where(
                &OrgId::from("org"),
                AdapterKind::Pco,
                &ids,
                guard,
                &LinkPatch::in_progress(now),
                now,
            )
            .await
            .expect("second claim");
        assert!(again.is_empty(), "both rows now hold live claims");
    }

    #[tokio::test]
    async fn write_counter_tracks_mutations_only() {
        let store = MemoryStore::new();
        store.list_links(None).await.expect("list");
        assert_eq!(store.writes(), 0);
        store.insert_many(vec![link("1", "per_a")]).await.expect("insert");
        assert_eq!(store.writes(), 1);
    }
}
