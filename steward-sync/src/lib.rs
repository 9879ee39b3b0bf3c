//! # steward-sync
//!
//! Moves records between the internal canonical graph and external systems
//! of record.
//!
//! - [`limiter`] throttles every adapter call on global and per-route buckets
//! - [`pull`] links and writes one page of external records
//! - [`chain`] pushes one internal mutation out through an adapter
//! - [`workflow`] composes those into idempotent, retried runs
//! - [`pipeline::run`] is the single entrypoint the daemon calls

pub mod activity;
pub mod chain;
pub mod context;
pub mod error;
pub mod ledger;
pub mod limiter;
pub mod pipeline;
pub mod pull;
pub mod sink;
pub mod staleness;
pub mod workflow;

pub use activity::{run_activity, RetryPolicy};
pub use chain::{process_mutation, Mutation, MutationKind, MutationOutcome};
pub use context::{Services, SyncContext};
pub use error::{ErrorKind, LimiterError, SinkError, SyncError};
pub use ledger::{IdempotencyKey, MemoryLedger, RunLedger, RunRecord, RunState};
pub use limiter::{MemoryCounterStore, RateLimiter};
pub use pipeline::{RunOutput, SyncRequest, SyncScope};
pub use pull::{pull_page, PageReport};
pub use sink::{EntitySink, MemorySink};
pub use staleness::{StuckLink, DEFAULT_STALE_AFTER};
pub use workflow::{
    Executor, ExternalPushEntityWorkflow, InternalSyncWorkflow, Submission, SyncWorkflow,
    WebhookEvent, WebhookOperation, WebhookOutcome, WebhookWorkflow,
};
