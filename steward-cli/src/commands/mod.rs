pub mod config;
pub mod daemon;
pub mod links;
pub mod manifest;
pub mod relationships;
pub mod run;
pub mod stuck;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use steward_core::{snapshot, StoreSnapshot};

pub(crate) fn home() -> Result<PathBuf> {
    dirs::home_dir().context("could not determine home directory")
}

/// The daemon's last saved store; empty when it has never run.
pub(crate) fn load_snapshot(home: &Path) -> Result<StoreSnapshot> {
    snapshot::load_at(home).with_context(|| {
        format!(
            "failed to read store snapshot at {}",
            snapshot::snapshot_path_at(home).display()
        )
    })
}

pub(crate) fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("failed to serialize JSON")?
    );
    Ok(())
}
