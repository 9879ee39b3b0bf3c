//! External Link Registry.
//!
//! Source of truth for "which internal record corresponds to which external
//! record, and is it being synced right now". Owns every mutation of
//! [`ExternalLink`] rows; other components go through this interface.
//!
//! Any path that touches more than one record must use the `_many` forms: a
//! pull page carries up to a hundred records and one store round-trip per
//! record would cost more than the rate-limited API call it protects.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::RegistryError;
use crate::store::LinkStore;
use crate::types::{
    AdapterKind, EntityId, EntityType, ExternalId, ExternalLink, LinkGuard, LinkPatch, OrgId,
};

/// Result of [`LinkRegistry::link`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkOutcome {
    Created(ExternalLink),
    /// The external record (or the entity) was already linked; the existing
    /// row has been stamped as processed instead.
    AlreadyLinked(ExternalLink),
}

impl LinkOutcome {
    pub fn link(&self) -> &ExternalLink {
        match self {
            LinkOutcome::Created(link) | LinkOutcome::AlreadyLinked(link) => link,
        }
    }

    pub fn into_link(self) -> ExternalLink {
        match self {
            LinkOutcome::Created(link) | LinkOutcome::AlreadyLinked(link) => link,
        }
    }
}

#[derive(Clone)]
pub struct LinkRegistry {
    store: Arc<dyn LinkStore>,
}

impl LinkRegistry {
    pub fn new(store: Arc<dyn LinkStore>) -> Self {
        Self { store }
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub async fn find_by_external_id(
        &self,
        org_id: &OrgId,
        adapter: AdapterKind,
        external_id: &ExternalId,
    ) -> Result<Option<ExternalLink>, RegistryError> {
        let mut found = self
            .store
            .find_by_external_ids(org_id, adapter, std::slice::from_ref(external_id))
            .await?;
        Ok(found.pop())
    }

    /// Batched lookup keyed by external id.
    pub async fn find_by_external_ids(
        &self,
        org_id: &OrgId,
        adapter: AdapterKind,
        external_ids: &[ExternalId],
    ) -> Result<HashMap<ExternalId, ExternalLink>, RegistryError> {
        if external_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let found = self
            .store
            .find_by_external_ids(org_id, adapter, external_ids)
            .await?;
        Ok(found
            .into_iter()
            .map(|link| (link.external_id.clone(), link))
            .collect())
    }

    /// Every adapter link of one internal entity.
    pub async fn get_for_entity(
        &self,
        org_id: &OrgId,
        entity_type: &EntityType,
        entity_id: &EntityId,
    ) -> Result<Vec<ExternalLink>, RegistryError> {
        self.store
            .find_by_entities(org_id, entity_type, std::slice::from_ref(entity_id))
            .await
    }

    /// Batched form of [`get_for_entity`](Self::get_for_entity). Every
    /// requested id is present in the result, unlinked ones with an empty vec.
    pub async fn get_for_entities(
        &self,
        org_id: &OrgId,
        entity_type: &EntityType,
        entity_ids: &[EntityId],
    ) -> Result<HashMap<EntityId, Vec<ExternalLink>>, RegistryError> {
        let mut grouped: HashMap<EntityId, Vec<ExternalLink>> = entity_ids
            .iter()
            .map(|id| (id.clone(), Vec::new()))
            .collect();
        if entity_ids.is_empty() {
            return Ok(grouped);
        }
        for link in self
            .store
            .find_by_entities(org_id, entity_type, entity_ids)
            .await?
        {
            grouped.entry(link.entity_id.clone()).or_default().push(link);
        }
        Ok(grouped)
    }

    /// The entity's link in one adapter, if any.
    pub async fn get_for_entity_in(
        &self,
        org_id: &OrgId,
        adapter: AdapterKind,
        entity_type: &EntityType,
        entity_id: &EntityId,
    ) -> Result<Option<ExternalLink>, RegistryError> {
        Ok(self
            .get_for_entity(org_id, entity_type, entity_id)
            .await?
            .into_iter()
            .find(|link| link.adapter == adapter))
    }

    pub async fn list(&self, org_id: Option<&OrgId>) -> Result<Vec<ExternalLink>, RegistryError> {
        self.store.list_links(org_id).await
    }

    /// Links held `syncing` for longer than `stale_after` as of `now`.
    pub async fn find_stuck(
        &self,
        org_id: Option<&OrgId>,
        now: DateTime<Utc>,
        stale_after: Duration,
    ) -> Result<Vec<ExternalLink>, RegistryError> {
        Ok(self
            .store
            .list_links(org_id)
            .await?
            .into_iter()
            .filter(|link| is_stale_claim(link, now, stale_after))
            .collect())
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Insert one link. A duplicate yields [`RegistryError::Conflict`].
    pub async fn create(&self, link: ExternalLink) -> Result<(), RegistryError> {
        self.store.insert_many(vec![link]).await
    }

    /// Insert a batch atomically. A duplicate anywhere rejects the batch.
    pub async fn create_many(&self, links: Vec<ExternalLink>) -> Result<(), RegistryError> {
        if links.is_empty() {
            return Ok(());
        }
        self.store.insert_many(links).await
    }

    /// Create the link, or fall back to stamping the existing one when the
    /// store reports a conflict.
    pub async fn link(&self, link: ExternalLink) -> Result<LinkOutcome, RegistryError> {
        match self.create(link.clone()).await {
            Ok(()) => Ok(LinkOutcome::Created(link)),
            Err(RegistryError::Conflict(conflict)) => {
                let key = conflict.link_key().clone();
                tracing::debug!(%key, "link already exists, stamping existing row");
                let existing = match self
                    .mark_sync_completed(&key.org_id, key.adapter, &key.external_id)
                    .await?
                {
                    Some(existing) => Some(existing),
                    // Entity-side conflict: the entity is linked under another external id.
                    None => {
                        self.get_for_entity_in(
                            &link.org_id,
                            link.adapter,
                            &link.entity_type,
                            &link.entity_id,
                        )
                        .await?
                    }
                };
                existing
                    .map(LinkOutcome::AlreadyLinked)
                    .ok_or(RegistryError::Conflict(conflict))
            }
            Err(err) => Err(err),
        }
    }

    /// Partial update; `None` when no such link exists.
    pub async fn update(
        &self,
        org_id: &OrgId,
        adapter: AdapterKind,
        external_id: &ExternalId,
        patch: LinkPatch,
    ) -> Result<Option<ExternalLink>, RegistryError> {
        let mut updated = self
            .store
            .update_many(
                org_id,
                adapter,
                std::slice::from_ref(external_id),
                &patch,
                Utc::now(),
            )
            .await?;
        Ok(updated.pop())
    }

    /// Explicit unlink. `None` means the record was never linked.
    pub async fn delete(
        &self,
        org_id: &OrgId,
        adapter: AdapterKind,
        external_id: &ExternalId,
    ) -> Result<Option<ExternalLink>, RegistryError> {
        let removed = self.store.delete(org_id, adapter, external_id).await?;
        if removed.is_some() {
            tracing::info!(org = %org_id, %adapter, external_id = %external_id, "external link removed");
        }
        Ok(removed)
    }

    pub async fn mark_sync_in_progress(
        &self,
        org_id: &OrgId,
        adapter: AdapterKind,
        external_id: &ExternalId,
    ) -> Result<Option<ExternalLink>, RegistryError> {
        Ok(self
            .mark_sync_in_progress_many(org_id, adapter, std::slice::from_ref(external_id))
            .await?
            .pop())
    }

    pub async fn mark_sync_in_progress_many(
        &self,
        org_id: &OrgId,
        adapter: AdapterKind,
        external_ids: &[ExternalId],
    ) -> Result<Vec<ExternalLink>, RegistryError> {
        self.patch_many(org_id, adapter, external_ids, LinkPatch::in_progress)
            .await
    }

    pub async fn mark_sync_completed(
        &self,
        org_id: &OrgId,
        adapter: AdapterKind,
        external_id: &ExternalId,
    ) -> Result<Option<ExternalLink>, RegistryError> {
        Ok(self
            .mark_sync_completed_many(org_id, adapter, std::slice::from_ref(external_id))
            .await?
            .pop())
    }

    pub async fn mark_sync_completed_many(
        &self,
        org_id: &OrgId,
        adapter: AdapterKind,
        external_ids: &[ExternalId],
    ) -> Result<Vec<ExternalLink>, RegistryError> {
        self.patch_many(org_id, adapter, external_ids, LinkPatch::completed)
            .await
    }

    /// Claim every link that is idle or whose claim went stale more than
    /// `stale_after` ago. Check and claim are one store step, so two runs
    /// racing for the same record cannot both win. Returns the claimed rows;
    /// ids missing from the result are held by a live claim (or unlinked).
    pub async fn claim_many(
        &self,
        org_id: &OrgId,
        adapter: AdapterKind,
        external_ids: &[ExternalId],
        stale_after: Duration,
    ) -> Result<Vec<ExternalLink>, RegistryError> {
        if external_ids.is_empty() {
            return Ok(vec![]);
        }
        let now = Utc::now();
        let guard = LinkGuard::Claimable {
            cutoff: cutoff(now, stale_after),
        };
        self.store
            .update_many_where(
                org_id,
                adapter,
                external_ids,
                guard,
                &LinkPatch::in_progress(now),
                now,
            )
            .await
    }

    /// Drop claims. `last_processed_at` keeps the time the claim was taken;
    /// only a completion moves it forward.
    pub async fn release_many(
        &self,
        org_id: &OrgId,
        adapter: AdapterKind,
        external_ids: &[ExternalId],
    ) -> Result<Vec<ExternalLink>, RegistryError> {
        self.patch_many(org_id, adapter, external_ids, |_| LinkPatch::released())
            .await
    }

    /// Release only claims that are still stale as of `now`. A row re-claimed
    /// by a fresh run since it was found stuck is left alone.
    pub async fn release_stale_many(
        &self,
        org_id: &OrgId,
        adapter: AdapterKind,
        external_ids: &[ExternalId],
        now: DateTime<Utc>,
        stale_after: Duration,
    ) -> Result<Vec<ExternalLink>, RegistryError> {
        if external_ids.is_empty() {
            return Ok(vec![]);
        }
        let guard = LinkGuard::Stuck {
            cutoff: cutoff(now, stale_after),
        };
        self.store
            .update_many_where(
                org_id,
                adapter,
                external_ids,
                guard,
                &LinkPatch::released(),
                Utc::now(),
            )
            .await
    }

    async fn patch_many(
        &self,
        org_id: &OrgId,
        adapter: AdapterKind,
        external_ids: &[ExternalId],
        patch: impl FnOnce(DateTime<Utc>) -> LinkPatch,
    ) -> Result<Vec<ExternalLink>, RegistryError> {
        if external_ids.is_empty() {
            return Ok(vec![]);
        }
        let now = Utc::now();
        self.store
            .update_many(org_id, adapter, external_ids, &patch(now), now)
            .await
    }
}

fn cutoff(now: DateTime<Utc>, stale_after: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(stale_after)
        .ok()
        .and_then(|d| now.checked_sub_signed(d))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// `syncing` and last stamped more than `stale_after` before `now`.
pub fn is_stale_claim(link: &ExternalLink, now: DateTime<Utc>, stale_after: Duration) -> bool {
    if !link.syncing {
        return false;
    }
    let stamped = link.last_processed_at.unwrap_or(link.updated_at);
    let age = now.signed_duration_since(stamped);
    age.to_std().map_or(false, |age| age > stale_after)
}
