//! `steward relationships`: observed entity-type references per organization.

use anyhow::Result;
use clap::Args;
use tabled::{settings::Style, Table, Tabled};

use steward_core::EntityRelationship;

use super::{home, load_snapshot, print_json};

#[derive(Args, Debug)]
pub struct RelationshipsArgs {
    #[arg(long)]
    pub org: String,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct RelationshipRow {
    #[tabled(rename = "entity type")]
    source: String,
    #[tabled(rename = "references")]
    targets: String,
    #[tabled(rename = "updated")]
    updated_at: String,
}

impl RelationshipsArgs {
    pub fn run(self) -> Result<()> {
        let home = home()?;
        let snapshot = load_snapshot(&home)?;
        let mut rows: Vec<EntityRelationship> = snapshot
            .relationships
            .into_iter()
            .filter(|row| row.org_id.as_str() == self.org)
            .collect();
        rows.sort_by(|a, b| a.source_entity_type.cmp(&b.source_entity_type));

        if self.json {
            return print_json(&rows);
        }
        if rows.is_empty() {
            println!("No relationships recorded for '{}'.", self.org);
            return Ok(());
        }

        let table_rows: Vec<RelationshipRow> = rows
            .into_iter()
            .map(|row| RelationshipRow {
                source: row.source_entity_type.to_string(),
                targets: row
                    .target_entity_types
                    .iter()
                    .map(|t| t.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
                updated_at: row.updated_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            })
            .collect();
        let mut table = Table::new(table_rows);
        table.with(Style::rounded());
        println!("{table}");
        Ok(())
    }
}
