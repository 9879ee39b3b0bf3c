//! Link and relationship registry behaviour against the in-memory store.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use steward_core::{
    AdapterKind, ConflictKey, EntityId, EntityType, ExternalId, ExternalLink, LinkRegistry,
    MemoryStore, OrgId, RegistryError, RelationshipPair, RelationshipRegistry,
};

fn org() -> OrgId {
    OrgId::from("org_grace")
}

fn person_link(external: &str, entity: &str) -> ExternalLink {
    ExternalLink::new(
        org(),
        AdapterKind::Pco,
        EntityType::from("person"),
        EntityId::from(entity),
        ExternalId::from(external),
        Utc::now(),
    )
}

fn links(store: &Arc<MemoryStore>) -> LinkRegistry {
    LinkRegistry::new(store.clone())
}

fn relationships(store: &Arc<MemoryStore>) -> RelationshipRegistry {
    RelationshipRegistry::new(store.clone())
}

// ---------------------------------------------------------------------------
// 1. Link uniqueness
// ---------------------------------------------------------------------------

#[tokio::test]
async fn creating_same_link_twice_signals_conflict() {
    let store = Arc::new(MemoryStore::new());
    let reg = links(&store);

    reg.create(person_link("1001", "per_a")).await.expect("first create");
    let err = reg
        .create(person_link("1001", "per_a"))
        .await
        .expect_err("second create must conflict");
    assert!(matches!(err, RegistryError::Conflict(ConflictKey::External(_))), "got: {err}");

    let all = reg.list(Some(&org())).await.expect("list");
    assert_eq!(all.len(), 1, "no duplicate row");
}

#[tokio::test]
async fn same_external_id_in_other_adapter_or_org_is_allowed() {
    let store = Arc::new(MemoryStore::new());
    let reg = links(&store);
    reg.create(person_link("1001", "per_a")).await.expect("pco");

    let mut ccb = person_link("1001", "per_a");
    ccb.adapter = AdapterKind::Ccb;
    reg.create(ccb).await.expect("same id in ccb");

    let mut other_org = person_link("1001", "per_z");
    other_org.org_id = OrgId::from("org_other");
    reg.create(other_org).await.expect("same id in another org");

    let per_a = reg
        .get_for_entity(&org(), &EntityType::from("person"), &EntityId::from("per_a"))
        .await
        .expect("get");
    assert_eq!(per_a.len(), 2, "one link per adapter");
}

// ---------------------------------------------------------------------------
// 2. Lookups
// ---------------------------------------------------------------------------

#[tokio::test]
async fn batched_entity_lookup_includes_unlinked_ids() {
    let store = Arc::new(MemoryStore::new());
    let reg = links(&store);
    reg.create_many(vec![person_link("1", "per_a"), person_link("2", "per_b")])
        .await
        .expect("create_many");

    let ids = [
        EntityId::from("per_a"),
        EntityId::from("per_b"),
        EntityId::from("per_c"),
    ];
    let grouped = reg
        .get_for_entities(&org(), &EntityType::from("person"), &ids)
        .await
        .expect("batch");
    assert_eq!(grouped.len(), 3);
    assert_eq!(grouped[&EntityId::from("per_a")][0].external_id.as_str(), "1");
    assert!(grouped[&EntityId::from("per_c")].is_empty());
}

#[tokio::test]
async fn find_by_external_id_distinguishes_unlinked_from_deleted() {
    let store = Arc::new(MemoryStore::new());
    let reg = links(&store);
    reg.create(person_link("7", "per_a")).await.expect("create");

    let removed = reg
        .delete(&org(), AdapterKind::Pco, &ExternalId::from("7"))
        .await
        .expect("delete");
    assert!(removed.is_some(), "explicit unlink returns the removed row");

    let again = reg
        .delete(&org(), AdapterKind::Pco, &ExternalId::from("7"))
        .await
        .expect("delete again");
    assert!(again.is_none(), "never-linked / already-unlinked returns None");

    let found = reg
        .find_by_external_id(&org(), AdapterKind::Pco, &ExternalId::from("7"))
        .await
        .expect("find");
    assert!(found.is_none());
}

// ---------------------------------------------------------------------------
// 3. Sync flags
// ---------------------------------------------------------------------------

#[tokio::test]
async fn sync_markers_toggle_flag_and_stamp_time() {
    let store = Arc::new(MemoryStore::new());
    let reg = links(&store);
    let mut seeded = person_link("9", "per_a");
    seeded.last_processed_at = None;
    reg.create(seeded).await.expect("create");
    let id = ExternalId::from("9");

    let claimed = reg
        .mark_sync_in_progress(&org(), AdapterKind::Pco, &id)
        .await
        .expect("claim")
        .expect("exists");
    assert!(claimed.syncing);
    let claimed_at = claimed.last_processed_at.expect("stamped");

    let done = reg
        .mark_sync_completed(&org(), AdapterKind::Pco, &id)
        .await
        .expect("complete")
        .expect("exists");
    assert!(!done.syncing);
    assert!(done.last_processed_at.expect("stamped") >= claimed_at);
}

#[tokio::test]
async fn release_keeps_last_processed_at() {
    let store = Arc::new(MemoryStore::new());
    let reg = links(&store);
    reg.create(person_link("9", "per_a")).await.expect("create");
    let ids = [ExternalId::from("9")];
    let claimed = reg
        .mark_sync_in_progress_many(&org(), AdapterKind::Pco, &ids)
        .await
        .expect("claim");
    let released = reg
        .release_many(&org(), AdapterKind::Pco, &ids)
        .await
        .expect("release");
    assert!(!released[0].syncing);
    assert_eq!(released[0].last_processed_at, claimed[0].last_processed_at);
}

#[tokio::test]
async fn stuck_claims_are_found_after_threshold() {
    let store = Arc::new(MemoryStore::new());
    let reg = links(&store);
    let mut stuck = person_link("1", "per_a");
    stuck.syncing = true;
    stuck.last_processed_at = Some(Utc::now() - chrono::Duration::minutes(30));
    let mut fresh = person_link("2", "per_b");
    fresh.syncing = true;
    reg.create_many(vec![stuck, fresh]).await.expect("seed");

    let found = reg
        .find_stuck(Some(&org()), Utc::now(), Duration::from_secs(15 * 60))
        .await
        .expect("stuck");
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].external_id.as_str(), "1");
}

// ---------------------------------------------------------------------------
// 4. Relationship registry
// ---------------------------------------------------------------------------

#[tokio::test]
async fn recording_is_bidirectional_union_not_replacement() {
    let store = Arc::new(MemoryStore::new());
    let reg = relationships(&store);

    reg.record_relationships(&org(), &[RelationshipPair::new("A", ["B"])])
        .await
        .expect("A->B");
    reg.record_relationships(&org(), &[RelationshipPair::new("B", ["C"])])
        .await
        .expect("B->C");

    let rows = reg.list(&org()).await.expect("list");
    let view: Vec<(String, Vec<String>)> = rows
        .iter()
        .map(|r| {
            (
                r.source_entity_type.to_string(),
                r.target_entity_types.iter().map(|t| t.to_string()).collect(),
            )
        })
        .collect();
    assert_eq!(
        view,
        vec![
            ("A".to_string(), vec!["B".to_string()]),
            ("B".to_string(), vec!["A".to_string(), "C".to_string()]),
            ("C".to_string(), vec!["B".to_string()]),
        ]
    );
}

#[tokio::test]
async fn empty_pair_list_performs_no_write() {
    let store = Arc::new(MemoryStore::new());
    let reg = relationships(&store);
    reg.record_relationships(&org(), &[]).await.expect("empty");
    assert_eq!(store.writes(), 0);
}

#[tokio::test]
async fn concurrent_writers_do_not_erase_each_other() {
    let store = Arc::new(MemoryStore::new());
    let reg = relationships(&store);

    let mut handles = Vec::new();
    for target in ["household", "email", "phone_number", "address", "group"] {
        let reg = reg.clone();
        handles.push(tokio::spawn(async move {
            reg.record_relationships(&org(), &[RelationshipPair::new("person", [target])])
                .await
        }));
    }
    for handle in handles {
        handle.await.expect("join").expect("record");
    }

    let targets = reg
        .targets_for(&org(), &EntityType::from("person"))
        .await
        .expect("targets");
    let names: Vec<&str> = targets.iter().map(|t| t.as_str()).collect();
    assert_eq!(names, vec!["address", "email", "group", "household", "phone_number"]);
}

#[tokio::test]
async fn relationships_are_scoped_per_org() {
    let store = Arc::new(MemoryStore::new());
    let reg = relationships(&store);
    reg.record_relationships(&org(), &[RelationshipPair::new("group", ["event"])])
        .await
        .expect("record");
    let other = reg.list(&OrgId::from("org_other")).await.expect("list");
    assert!(other.is_empty());
}
