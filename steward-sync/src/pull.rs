//! Pull pipeline: one page of external records into the canonical graph.
//!
//! Per page, store traffic is a fixed number of batched calls (one lookup,
//! one conditional claim, one insert, one completion, one release) regardless
//! of the page size. The claim is decided by the store, not from the lookup,
//! so concurrent runs over the same record cannot both process it. Records are independent: a record that fails to transform or
//! to write is reported and released, and the rest of the page proceeds.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};

use steward_adapter::{CanonicalRecord, ExternalRecord};
use steward_core::entity::EntityDescriptor;
use steward_core::{ConflictKey, EntityId, ExternalId, ExternalLink, RegistryError, RelationshipPair};

use crate::context::SyncContext;
use crate::error::{ErrorKind, SyncError};

/// One record that did not make it into the canonical graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordFailure {
    pub external_id: ExternalId,
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageReport {
    pub fetched: usize,
    pub created: usize,
    pub updated: usize,
    /// Records another run currently holds a live claim on.
    pub skipped_in_flight: usize,
    pub failed: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<RecordFailure>,
}

impl PageReport {
    pub fn absorb(&mut self, other: PageReport) {
        self.fetched += other.fetched;
        self.created += other.created;
        self.updated += other.updated;
        self.skipped_in_flight += other.skipped_in_flight;
        self.failed += other.failed;
        self.failures.extend(other.failures);
    }

    fn fail(&mut self, external_id: ExternalId, err: &SyncError) {
        self.failed += 1;
        self.failures.push(RecordFailure {
            external_id,
            kind: err.kind(),
            message: err.to_string(),
        });
    }
}

struct Pending {
    canonical: CanonicalRecord,
    entity_id: EntityId,
    created: bool,
}

/// Transform, link and write one page of `descriptor` records.
pub async fn pull_page(
    ctx: &SyncContext,
    descriptor: &EntityDescriptor,
    records: Vec<ExternalRecord>,
) -> Result<PageReport, SyncError> {
    let entity_type = descriptor.entity_type();
    let adapter = ctx.kind();
    let mut report = PageReport {
        fetched: records.len(),
        ..PageReport::default()
    };

    let mut canonical = Vec::with_capacity(records.len());
    for record in &records {
        match ctx.adapter.to_canonical(&entity_type, record) {
            Ok(c) => canonical.push(c),
            Err(err) => {
                let err = SyncError::from(err);
                tracing::warn!(%entity_type, external_id = %record.id, error = %err, "record transform failed");
                report.fail(record.id.clone(), &err);
            }
        }
    }
    if canonical.is_empty() {
        return Ok(report);
    }

    let ids: Vec<ExternalId> = canonical.iter().map(|c| c.external_id.clone()).collect();
    let existing = ctx
        .links
        .find_by_external_ids(&ctx.org_id, adapter, &ids)
        .await
        .map_err(SyncError::LinkRetrieval)?;

    let now = Utc::now();
    let stale_after = ctx.settings.stale_after();
    let mut known = Vec::new();
    let mut pending = Vec::new();
    let mut new_links = Vec::new();
    for c in canonical {
        if existing.contains_key(&c.external_id) {
            known.push(c);
            continue;
        }
        let entity_id = EntityId::for_external(descriptor, &ctx.org_id, adapter, &c.external_id);
        let mut link = ExternalLink::new(
            ctx.org_id.clone(),
            adapter,
            entity_type.clone(),
            entity_id.clone(),
            c.external_id.clone(),
            now,
        );
        link.syncing = true;
        new_links.push(link);
        pending.push(Pending {
            entity_id,
            canonical: c,
            created: true,
        });
    }

    // The store decides which known records are free; a live claim held by
    // another run leaves the row out of the result.
    let to_claim: Vec<ExternalId> = known.iter().map(|c| c.external_id.clone()).collect();
    let claimed: HashMap<ExternalId, EntityId> = ctx
        .links
        .claim_many(&ctx.org_id, adapter, &to_claim, stale_after)
        .await
        .map_err(SyncError::LinkUpsert)?
        .into_iter()
        .map(|link| (link.external_id, link.entity_id))
        .collect();
    for c in known {
        match claimed.get(&c.external_id) {
            Some(entity_id) => pending.push(Pending {
                entity_id: entity_id.clone(),
                canonical: c,
                created: false,
            }),
            None => {
                tracing::debug!(external_id = %c.external_id, "record in flight, skipping");
                report.skipped_in_flight += 1;
            }
        }
    }

    let settled = create_links(ctx, new_links, stale_after).await?;
    let mut ready = Vec::with_capacity(pending.len());
    for mut p in pending {
        match settled.get(&p.canonical.external_id) {
            None => ready.push(p),
            Some(Settled::Linked(entity_id)) => {
                p.entity_id = entity_id.clone();
                p.created = false;
                ready.push(p);
            }
            Some(Settled::InFlight) => {
                tracing::debug!(external_id = %p.canonical.external_id, "record linked and claimed by another run, skipping");
                report.skipped_in_flight += 1;
            }
            Some(Settled::Failed(err)) => {
                tracing::warn!(%entity_type, external_id = %p.canonical.external_id, error = %err, "record link failed");
                report.fail(p.canonical.external_id.clone(), err);
            }
        }
    }
    let pending = ready;

    let concurrency = ctx.settings.record_concurrency.max(1);
    let results: Vec<(Pending, Result<(), SyncError>)> = stream::iter(pending)
        .map(|p| async move {
            let result = ctx
                .sink
                .upsert(&ctx.org_id, &p.entity_id, &p.canonical)
                .await
                .map_err(SyncError::from);
            (p, result)
        })
        .buffer_unordered(concurrency)
        .collect()
        .await;

    let mut succeeded = Vec::new();
    let mut failed = Vec::new();
    let mut pairs = Vec::new();
    for (p, result) in results {
        match result {
            Ok(()) => {
                if p.created {
                    report.created += 1;
                } else {
                    report.updated += 1;
                }
                if !p.canonical.related.is_empty() {
                    pairs.push(RelationshipPair::new(
                        entity_type.clone(),
                        p.canonical.related.iter().cloned(),
                    ));
                }
                succeeded.push(p.canonical.external_id);
            }
            Err(err) => {
                tracing::warn!(%entity_type, external_id = %p.canonical.external_id, error = %err, "record write failed");
                report.fail(p.canonical.external_id.clone(), &err);
                failed.push(p.canonical.external_id);
            }
        }
    }

    ctx.links
        .mark_sync_completed_many(&ctx.org_id, adapter, &succeeded)
        .await
        .map_err(SyncError::LinkUpsert)?;
    ctx.links
        .release_many(&ctx.org_id, adapter, &failed)
        .await
        .map_err(SyncError::LinkUpsert)?;

    if let Err(err) = ctx.relationships.record_relationships(&ctx.org_id, &pairs).await {
        let err = SyncError::RelationshipProcessing(err);
        tracing::warn!(org = %ctx.org_id, %entity_type, error = %err, "relationship registry update skipped");
    }

    tracing::debug!(
        %entity_type,
        fetched = report.fetched,
        created = report.created,
        updated = report.updated,
        skipped = report.skipped_in_flight,
        failed = report.failed,
        "page processed"
    );
    Ok(report)
}

/// How a first-seen record ended up after its link insert conflicted.
enum Settled {
    /// Another run linked it first; this run now holds the claim.
    Linked(EntityId),
    /// Linked by another run that is still working on it.
    InFlight,
    Failed(SyncError),
}

/// Insert links for first-seen records. When the batch conflicts (another run
/// linked some of them first), fall back to one insert per record and claim
/// the rows that turned out to exist. Records missing from the result were
/// created by this run.
async fn create_links(
    ctx: &SyncContext,
    links: Vec<ExternalLink>,
    stale_after: Duration,
) -> Result<HashMap<ExternalId, Settled>, SyncError> {
    let mut settled = HashMap::new();
    match ctx.links.create_many(links.clone()).await {
        Ok(()) => return Ok(settled),
        Err(RegistryError::Conflict(conflict)) => {
            tracing::debug!(%conflict, "batch link insert conflicted, linking per record");
        }
        Err(err) => return Err(SyncError::LinkUpsert(err)),
    }
    for link in links {
        let external_id = link.external_id.clone();
        match ctx.links.create(link).await {
            Ok(()) => {}
            Err(RegistryError::Conflict(ConflictKey::External(_))) => {
                let claimed = ctx
                    .links
                    .claim_many(
                        &ctx.org_id,
                        ctx.kind(),
                        std::slice::from_ref(&external_id),
                        stale_after,
                    )
                    .await
                    .map_err(SyncError::LinkUpsert)?;
                let outcome = match claimed.into_iter().next() {
                    Some(existing) => Settled::Linked(existing.entity_id),
                    None => Settled::InFlight,
                };
                settled.insert(external_id, outcome);
            }
            Err(err @ RegistryError::Conflict(ConflictKey::Entity { .. })) => {
                settled.insert(external_id, Settled::Failed(SyncError::LinkUpsert(err)));
            }
            Err(err) => return Err(SyncError::LinkUpsert(err)),
        }
    }
    Ok(settled)
}
