//! `steward links`: external links as of the last store snapshot.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use steward_core::{config, AdapterKind, ExternalLink};
use steward_sync::staleness::{format_seconds, is_stuck};

use super::{home, load_snapshot, print_json};

/// Arguments for `steward links`.
#[derive(Args, Debug)]
pub struct LinksArgs {
    /// Only links of this organization.
    #[arg(long)]
    pub org: Option<String>,

    /// Only links to this external system (pco, ccb).
    #[arg(long)]
    pub adapter: Option<AdapterKind>,

    /// Only links of this entity type, e.g. `person`.
    #[arg(long)]
    pub entity_type: Option<String>,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct LinkRow {
    #[tabled(rename = "org")]
    org: String,
    #[tabled(rename = "adapter")]
    adapter: String,
    #[tabled(rename = "entity type")]
    entity_type: String,
    #[tabled(rename = "entity id")]
    entity_id: String,
    #[tabled(rename = "external id")]
    external_id: String,
    #[tabled(rename = "state")]
    state: &'static str,
    #[tabled(rename = "last processed")]
    last_processed: String,
}

impl LinksArgs {
    pub fn run(self) -> Result<()> {
        let home = home()?;
        let settings = config::load_at(&home).context("failed to load config")?;
        let snapshot = load_snapshot(&home)?;

        let mut links: Vec<ExternalLink> = snapshot
            .links
            .into_iter()
            .filter(|link| self.matches(link))
            .collect();
        links.sort_by(|a, b| {
            (&a.org_id, a.adapter, &a.entity_type, &a.external_id).cmp(&(
                &b.org_id,
                b.adapter,
                &b.entity_type,
                &b.external_id,
            ))
        });

        if self.json {
            return print_json(&links);
        }

        let now = Utc::now();
        let stale_after = settings.stale_after();
        let syncing = links.iter().filter(|link| link.syncing).count();
        let stuck = links
            .iter()
            .filter(|link| is_stuck(link, now, stale_after))
            .count();

        println!(
            "Steward v{} | {} links | {} syncing | {} stuck",
            env!("CARGO_PKG_VERSION"),
            links.len(),
            syncing,
            stuck,
        );
        if links.is_empty() {
            println!("No links recorded.");
            return Ok(());
        }

        let rows: Vec<LinkRow> = links
            .iter()
            .map(|link| LinkRow {
                org: link.org_id.to_string(),
                adapter: link.adapter.to_string(),
                entity_type: link.entity_type.to_string(),
                entity_id: link.entity_id.to_string(),
                external_id: link.external_id.to_string(),
                state: link_state(link, is_stuck(link, now, stale_after)),
                last_processed: age(link.last_processed_at, now),
            })
            .collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");

        if stuck > 0 {
            println!(
                "{}",
                format!("{stuck} stuck claim(s); the daemon releases them on its next sweep.")
                    .yellow()
            );
        }
        Ok(())
    }

    fn matches(&self, link: &ExternalLink) -> bool {
        self.org
            .as_deref()
            .map_or(true, |org| link.org_id.as_str() == org)
            && self.adapter.map_or(true, |adapter| link.adapter == adapter)
            && self
                .entity_type
                .as_deref()
                .map_or(true, |et| link.entity_type.as_str() == et)
    }
}

fn link_state(link: &ExternalLink, stuck: bool) -> &'static str {
    match (link.syncing, stuck) {
        (_, true) => "STUCK",
        (true, false) => "SYNCING",
        (false, false) => "IDLE",
    }
}

fn age(at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    match at {
        Some(at) => {
            let secs = now.signed_duration_since(at).num_seconds().max(0) as u64;
            format!("{} ago", format_seconds(secs))
        }
        None => "never".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn ages_are_compact() {
        let now = Utc::now();
        assert_eq!(age(None, now), "never");
        assert_eq!(age(Some(now - Duration::minutes(17)), now), "17m ago");
        assert_eq!(age(Some(now + Duration::seconds(5)), now), "0s ago");
    }
}
