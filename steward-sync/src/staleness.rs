//! Stuck-link detection.
//!
//! A link left `syncing` past [`DEFAULT_STALE_AFTER`] belongs to a run that
//! died mid-flight. Pull pages already ignore such claims; the daemon's
//! maintenance tick sweeps them and releases them so status output is honest.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use steward_core::links::is_stale_claim;
use steward_core::{
    AdapterKind, EntityId, EntityType, ExternalId, ExternalLink, LinkRegistry, OrgId,
    RegistryError,
};

pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StuckLink {
    pub org_id: OrgId,
    pub adapter: AdapterKind,
    pub entity_type: EntityType,
    pub entity_id: EntityId,
    pub external_id: ExternalId,
    pub age_secs: u64,
    /// Compact age, e.g. `17m`.
    pub age: String,
}

impl StuckLink {
    fn from_link(link: &ExternalLink, now: DateTime<Utc>) -> Self {
        let stamped = link.last_processed_at.unwrap_or(link.updated_at);
        let age_secs = now.signed_duration_since(stamped).num_seconds().max(0) as u64;
        Self {
            org_id: link.org_id.clone(),
            adapter: link.adapter,
            entity_type: link.entity_type.clone(),
            entity_id: link.entity_id.clone(),
            external_id: link.external_id.clone(),
            age_secs,
            age: format_seconds(age_secs),
        }
    }
}

pub fn is_stuck(link: &ExternalLink, now: DateTime<Utc>, stale_after: Duration) -> bool {
    is_stale_claim(link, now, stale_after)
}

/// Stuck links among `links`, oldest first.
pub fn classify(
    links: &[ExternalLink],
    now: DateTime<Utc>,
    stale_after: Duration,
) -> Vec<StuckLink> {
    let mut stuck: Vec<StuckLink> = links
        .iter()
        .filter(|link| is_stuck(link, now, stale_after))
        .map(|link| StuckLink::from_link(link, now))
        .collect();
    stuck.sort_by(|a, b| b.age_secs.cmp(&a.age_secs));
    stuck
}

pub async fn sweep(
    links: &LinkRegistry,
    org_id: Option<&OrgId>,
    now: DateTime<Utc>,
    stale_after: Duration,
) -> Result<Vec<StuckLink>, RegistryError> {
    let all = links.list(org_id).await?;
    Ok(classify(&all, now, stale_after))
}

/// Release the claims of `stuck` that are still stale as of `now`. A link
/// re-claimed by a fresh run after the sweep keeps its claim. Returns how
/// many links were released.
pub async fn reclaim(
    links: &LinkRegistry,
    stuck: &[StuckLink],
    now: DateTime<Utc>,
    stale_after: Duration,
) -> Result<usize, RegistryError> {
    let mut grouped: BTreeMap<(OrgId, AdapterKind), Vec<ExternalId>> = BTreeMap::new();
    for s in stuck {
        grouped
            .entry((s.org_id.clone(), s.adapter))
            .or_default()
            .push(s.external_id.clone());
    }
    let mut released = 0;
    for ((org_id, adapter), ids) in grouped {
        released += links
            .release_stale_many(&org_id, adapter, &ids, now, stale_after)
            .await?
            .len();
    }
    if released > 0 {
        tracing::info!(released, "stuck sync claims released");
    }
    Ok(released)
}

/// Format an age in seconds as `42s`, `17m`, `3h` or `2d`.
pub fn format_seconds(seconds: u64) -> String {
    match seconds {
        s if s < 60 => format!("{s}s"),
        s if s < 60 * 60 => format!("{}m", s / 60),
        s if s < 60 * 60 * 24 => format!("{}h", s / (60 * 60)),
        s => format!("{}d", s / (60 * 60 * 24)),
    }
}
