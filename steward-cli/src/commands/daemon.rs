//! `steward daemon`: query or stop a running daemon.
//!
//! The daemon itself is started by the service that embeds it, since only
//! that service holds the adapter credentials and the entity sink.

use anyhow::{Context, Result};
use clap::Subcommand;

use steward_daemon::paths::socket_path;
use steward_daemon::{request_status, request_stop, DaemonError};

use super::{home, print_json};

#[derive(Subcommand, Debug)]
pub enum DaemonCommand {
    /// Query daemon runtime status over its Unix socket.
    Status,
    /// Request graceful daemon shutdown.
    Stop,
}

pub fn run(command: DaemonCommand) -> Result<()> {
    let home = home()?;

    match command {
        DaemonCommand::Stop => match request_stop(&home) {
            Ok(()) => println!("daemon stop requested"),
            Err(DaemonError::DaemonNotRunning { .. }) => {
                println!("daemon is not running");
            }
            Err(err) => return Err(err).context("failed to stop daemon"),
        },
        DaemonCommand::Status => match request_status(&home) {
            Ok(status) => print_json(&status)?,
            Err(DaemonError::DaemonNotRunning { .. }) => {
                print_json(&serde_json::json!({
                    "running": false,
                    "socket": socket_path(&home).display().to_string(),
                }))?;
            }
            Err(err) => return Err(err).context("failed to query daemon status"),
        },
    }

    Ok(())
}
