//! `steward sync|push|webhook`: submit runs to a running daemon.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Deserialize;
use serde_json::Value;

use steward_core::{EntityType, ExternalId, OrgId, TokenKey};
use steward_daemon::{request_run, DaemonError, DaemonRequest};
use steward_sync::{
    Mutation, MutationOutcome, RunOutput, RunState, Submission, WebhookEvent, WebhookOperation,
    WebhookOutcome,
};

use super::{home, print_json};

/// Target shared by every run command.
#[derive(Args, Debug)]
pub struct Target {
    /// Adapter tag (pco, ccb).
    #[arg(long)]
    pub adapter: String,

    #[arg(long)]
    pub org: String,

    /// Key of the credential the run is bound to.
    #[arg(long)]
    pub token: String,

    /// Emit the daemon's reply as JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct SyncArgs {
    #[command(flatten)]
    pub target: Target,

    /// Pull only these entity types, in this order (repeatable).
    #[arg(long = "entity")]
    pub entities: Vec<String>,
}

#[derive(Args, Debug)]
pub struct PushArgs {
    #[command(flatten)]
    pub target: Target,

    /// Entity type of the batch.
    #[arg(long)]
    pub entity: String,

    /// JSON array of mutations.
    #[arg(long)]
    pub file: PathBuf,
}

#[derive(Args, Debug)]
pub struct WebhookArgs {
    #[command(flatten)]
    pub target: Target,

    #[arg(long)]
    pub event_type: String,

    #[arg(long)]
    pub external_id: String,

    /// The external record was deleted.
    #[arg(long)]
    pub delete: bool,
}

/// Mirror of the daemon's run summary.
#[derive(Debug, Deserialize)]
struct RunReply {
    adapter: String,
    org_id: String,
    result: Submission<RunOutput>,
    duration_ms: u64,
}

impl SyncArgs {
    pub fn run(self) -> Result<()> {
        let entities = if self.entities.is_empty() {
            None
        } else {
            Some(self.entities.iter().map(|e| EntityType::from(e.as_str())).collect())
        };
        let request = DaemonRequest::Sync {
            adapter: self.target.adapter.clone(),
            org_id: OrgId::from(self.target.org.as_str()),
            token_key: TokenKey::from(self.target.token.as_str()),
            entities,
        };
        submit(&self.target, request)
    }
}

impl PushArgs {
    pub fn run(self) -> Result<()> {
        let raw = std::fs::read_to_string(&self.file)
            .with_context(|| format!("failed to read {}", self.file.display()))?;
        let mutations: Vec<Mutation> = serde_json::from_str(&raw)
            .with_context(|| format!("{} is not a JSON array of mutations", self.file.display()))?;
        if mutations.is_empty() {
            bail!("{} contains no mutations", self.file.display());
        }
        let request = DaemonRequest::Push {
            adapter: self.target.adapter.clone(),
            org_id: OrgId::from(self.target.org.as_str()),
            token_key: TokenKey::from(self.target.token.as_str()),
            entity: EntityType::from(self.entity.as_str()),
            mutations,
        };
        submit(&self.target, request)
    }
}

impl WebhookArgs {
    pub fn run(self) -> Result<()> {
        let operation = if self.delete {
            WebhookOperation::Delete
        } else {
            WebhookOperation::Upsert
        };
        let request = DaemonRequest::Webhook {
            adapter: self.target.adapter.clone(),
            org_id: OrgId::from(self.target.org.as_str()),
            token_key: TokenKey::from(self.target.token.as_str()),
            event: WebhookEvent {
                event_type: self.event_type.clone(),
                external_id: ExternalId::from(self.external_id.as_str()),
                operation,
            },
        };
        submit(&self.target, request)
    }
}

fn submit(target: &Target, request: DaemonRequest) -> Result<()> {
    let home = home()?;
    let cmd = request.cmd();
    let data = match request_run(&home, &request) {
        Ok(data) => data,
        Err(DaemonError::DaemonNotRunning { socket }) => {
            bail!(
                "daemon is not running (no socket at {}); start the service that embeds it",
                socket.display()
            )
        }
        Err(err) => return Err(err).with_context(|| format!("{cmd} run failed")),
    };

    if target.json {
        return print_json(&data);
    }
    print_reply(data)
}

fn print_reply(data: Value) -> Result<()> {
    let reply: RunReply =
        serde_json::from_value(data).context("unexpected reply from daemon")?;
    let header = format!("{} / {}", reply.adapter, reply.org_id);

    let output = match reply.result {
        Submission::Duplicate(record) => {
            println!(
                "{} {header}: already {} as {} (attempt {})",
                "↺".yellow().bold(),
                run_state_label(&record.state),
                record.key,
                record.attempt
            );
            return Ok(());
        }
        Submission::Completed(output) => output,
    };

    println!(
        "{} {header}: completed in {}ms",
        "✓".green().bold(),
        reply.duration_ms
    );
    for line in describe(&output) {
        println!("  {line}");
    }
    Ok(())
}

fn run_state_label(state: &RunState) -> &'static str {
    match state {
        RunState::Queued => "queued",
        RunState::Running => "running",
        RunState::Succeeded => "succeeded",
        RunState::Failed { .. } => "failed",
    }
}

fn describe(output: &RunOutput) -> Vec<String> {
    match output {
        RunOutput::Pull(report) => report
            .entities
            .iter()
            .map(|entity| {
                format!(
                    "{}: {} fetched, {} created, {} updated, {} in flight, {} failed",
                    entity.entity_type,
                    entity.totals.fetched,
                    entity.totals.created,
                    entity.totals.updated,
                    entity.totals.skipped_in_flight,
                    entity.totals.failed
                )
            })
            .collect(),
        RunOutput::Push(report) => report
            .outcomes
            .iter()
            .map(|outcome| {
                let verb = match outcome {
                    MutationOutcome::Created { .. } => "created",
                    MutationOutcome::Updated { .. } => "updated",
                    MutationOutcome::Deleted { .. } => "deleted",
                };
                let link = outcome.link();
                format!("{verb} {} ↔ {}", link.entity_id, link.external_id)
            })
            .collect(),
        RunOutput::Webhook(outcome) => vec![match outcome {
            WebhookOutcome::Synced { report } => format!(
                "synced ({} created, {} updated)",
                report.created, report.updated
            ),
            WebhookOutcome::Missing => "record no longer exists upstream".to_string(),
            WebhookOutcome::Unlinked { link: Some(link) } => {
                format!("unlinked {} ↔ {}", link.entity_id, link.external_id)
            }
            WebhookOutcome::Unlinked { link: None } => "was not linked".to_string(),
        }],
    }
}
