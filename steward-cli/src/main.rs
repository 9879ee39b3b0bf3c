//! Steward: inspect and drive external-system sync.
//!
//! # Usage
//!
//! ```text
//! steward links [--org <org>] [--adapter pco|ccb] [--entity-type <type>] [--json]
//! steward relationships --org <org> [--json]
//! steward stuck [--org <org>] [--json]
//! steward config
//! steward routes <adapter> [--json]
//! steward detect <table>
//! steward sync --adapter <tag> --org <org> --token <key> [--entity <type>]... [--json]
//! steward push --adapter <tag> --org <org> --token <key> --entity <type> --file <mutations.json> [--json]
//! steward webhook --adapter <tag> --org <org> --token <key> --event-type <type> --external-id <id> [--delete] [--json]
//! steward daemon status|stop
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    config::ConfigArgs,
    daemon::DaemonCommand,
    links::LinksArgs,
    manifest::{DetectArgs, RoutesArgs},
    relationships::RelationshipsArgs,
    run::{PushArgs, SyncArgs, WebhookArgs},
    stuck::StuckArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "steward",
    version,
    about = "Inspect and drive sync between the canonical graph and external systems",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List external links from the last store snapshot.
    Links(LinksArgs),

    /// Show which entity types reference which, per organization.
    Relationships(RelationshipsArgs),

    /// List links whose sync claim has gone stale.
    Stuck(StuckArgs),

    /// Print the effective configuration.
    Config(ConfigArgs),

    /// Show an adapter's entity endpoints and routes.
    Routes(RoutesArgs),

    /// Resolve a canonical table name to its entity type.
    Detect(DetectArgs),

    /// Pull external records through a running daemon.
    Sync(SyncArgs),

    /// Push a batch of internal mutations through a running daemon.
    Push(PushArgs),

    /// Replay one webhook event through a running daemon.
    Webhook(WebhookArgs),

    /// Query or stop the background daemon.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Links(args) => args.run(),
        Commands::Relationships(args) => args.run(),
        Commands::Stuck(args) => args.run(),
        Commands::Config(args) => args.run(),
        Commands::Routes(args) => args.run(),
        Commands::Detect(args) => args.run(),
        Commands::Sync(args) => args.run(),
        Commands::Push(args) => args.run(),
        Commands::Webhook(args) => args.run(),
        Commands::Daemon { command } => commands::daemon::run(command),
    }
}
