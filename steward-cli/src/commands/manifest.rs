//! `steward routes` and `steward detect`: static adapter and catalog lookups.

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use steward_adapter::{detect_table, Manifest, Method};
use steward_core::AdapterKind;

use super::print_json;

#[derive(Args, Debug)]
pub struct RoutesArgs {
    /// Adapter tag (pco, ccb).
    pub adapter: AdapterKind,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Serialize, Tabled)]
struct EndpointRow {
    #[tabled(rename = "entity type")]
    entity_type: &'static str,
    #[tabled(rename = "resource")]
    resource: String,
    #[tabled(rename = "methods")]
    methods: String,
    #[tabled(rename = "pulled")]
    pulled: bool,
    #[tabled(rename = "webhook prefix")]
    event_prefix: String,
}

impl RoutesArgs {
    pub fn run(self) -> Result<()> {
        let manifest = Manifest::for_kind(self.adapter);
        let rows: Vec<EndpointRow> = manifest
            .endpoints()
            .iter()
            .map(|endpoint| EndpointRow {
                entity_type: endpoint.entity_type,
                resource: format!("{}.{}", endpoint.module, endpoint.resource),
                methods: Method::ALL
                    .iter()
                    .filter(|method| endpoint.supports(**method))
                    .map(|method| method.to_string())
                    .collect::<Vec<_>>()
                    .join(","),
                pulled: endpoint.is_syncable(),
                event_prefix: endpoint.event_prefix.unwrap_or("-").to_string(),
            })
            .collect();

        if self.json {
            return print_json(&rows);
        }
        println!("{} | {} entity types", self.adapter, rows.len());
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
        Ok(())
    }
}

#[derive(Args, Debug)]
pub struct DetectArgs {
    /// Canonical table name, e.g. `people`.
    pub table: String,
}

impl DetectArgs {
    pub fn run(self) -> Result<()> {
        let descriptor = detect_table(&self.table)
            .with_context(|| format!("cannot sync table '{}'", self.table))?;
        println!(
            "{} → {} (ids: {}_…)",
            descriptor.table, descriptor.entity_type, descriptor.prefix
        );
        Ok(())
    }
}
