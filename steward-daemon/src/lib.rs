//! Long-running sync daemon: job queue + maintenance sweep + socket server.

mod error;
pub mod paths;
pub mod protocol;
mod runtime;

pub use error::DaemonError;
pub use protocol::{
    request_run, request_status, request_stop, send_request, DaemonRequest, DaemonResponse,
};
pub use runtime::{bootstrap, run, start_blocking, RunSummary};
