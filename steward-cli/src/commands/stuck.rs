//! `steward stuck`: links whose sync claim outlived the stale threshold.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use steward_core::config;
use steward_sync::staleness::{classify, format_seconds};

use super::{home, load_snapshot, print_json};

#[derive(Args, Debug)]
pub struct StuckArgs {
    /// Only links of this organization.
    #[arg(long)]
    pub org: Option<String>,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct StuckRow {
    #[tabled(rename = "org")]
    org: String,
    #[tabled(rename = "adapter")]
    adapter: String,
    #[tabled(rename = "entity type")]
    entity_type: String,
    #[tabled(rename = "external id")]
    external_id: String,
    #[tabled(rename = "claimed for")]
    age: String,
}

impl StuckArgs {
    pub fn run(self) -> Result<()> {
        let home = home()?;
        let settings = config::load_at(&home).context("failed to load config")?;
        let mut links = load_snapshot(&home)?.links;
        if let Some(org) = self.org.as_deref() {
            links.retain(|link| link.org_id.as_str() == org);
        }

        let stuck = classify(&links, Utc::now(), settings.stale_after());
        if self.json {
            return print_json(&stuck);
        }

        if stuck.is_empty() {
            println!(
                "{} no claims older than {}",
                "✓".green().bold(),
                format_seconds(settings.stale_after_secs)
            );
            return Ok(());
        }

        let rows: Vec<StuckRow> = stuck
            .into_iter()
            .map(|s| StuckRow {
                org: s.org_id.to_string(),
                adapter: s.adapter.to_string(),
                entity_type: s.entity_type.to_string(),
                external_id: s.external_id.to_string(),
                age: s.age,
            })
            .collect();
        println!(
            "{} {} stuck claim(s)",
            "■".red().bold(),
            rows.len()
        );
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
        Ok(())
    }
}
