//! `steward config`: settings after defaults are applied.

use anyhow::{Context, Result};
use clap::Args;

use steward_core::{config, paths};

use super::{home, print_json};

#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Print only the path of the config file.
    #[arg(long)]
    pub path: bool,
}

impl ConfigArgs {
    pub fn run(self) -> Result<()> {
        let home = home()?;
        let path = paths::config_path(&home);
        if self.path {
            println!("{}", path.display());
            return Ok(());
        }
        let settings = config::load_at(&home)
            .with_context(|| format!("failed to load {}", path.display()))?;
        print_json(&settings)
    }
}
