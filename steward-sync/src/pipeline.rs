//! Shared sync entrypoint used by the daemon and by embedders.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use steward_core::{EntityType, OrgId, TokenKey};

use crate::chain::Mutation;
use crate::context::Services;
use crate::error::SyncError;
use crate::workflow::{
    ExternalPushEntityWorkflow, PushReport, Submission, SyncReport, SyncWorkflow, WebhookEvent,
    WebhookOutcome, WebhookWorkflow,
};

/// What a run should do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum SyncScope {
    /// Pull every syncable entity type, or only `entities`.
    Pull {
        #[serde(default)]
        entities: Option<Vec<EntityType>>,
    },
    /// Push a batch of mutations of one entity type.
    Push {
        entity: EntityType,
        mutations: Vec<Mutation>,
    },
    Webhook { event: WebhookEvent },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRequest {
    /// Adapter tag as received; unknown tags fail with the accepted list.
    pub adapter: String,
    pub org_id: OrgId,
    pub token_key: TokenKey,
    #[serde(flatten)]
    pub scope: SyncScope,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "workflow", rename_all = "snake_case")]
pub enum RunOutput {
    Pull(SyncReport),
    Push(PushReport),
    Webhook(WebhookOutcome),
}

/// Resolve the adapter, derive the idempotency key and run the workflow the
/// scope names under the executor.
pub async fn run(
    services: &Services,
    request: SyncRequest,
) -> Result<Submission<RunOutput>, SyncError> {
    let ctx = services
        .context(&request.adapter, request.org_id, request.token_key)
        .await?;
    let adapter = ctx.kind();
    let now = Utc::now();
    let bucket = services.settings.idempotency_bucket();
    let executor = &services.executor;

    let submission = match request.scope {
        SyncScope::Pull { entities } => {
            let workflow = SyncWorkflow {
                adapter,
                org_id: ctx.org_id.clone(),
                token_key: ctx.token_key.clone(),
                entities,
            };
            let key = workflow.key(now, bucket);
            map(
                executor
                    .submit(SyncWorkflow::NAME, key, workflow.execute(&ctx))
                    .await?,
                RunOutput::Pull,
            )
        }
        SyncScope::Push { entity, mutations } => {
            let workflow = ExternalPushEntityWorkflow {
                adapter,
                org_id: ctx.org_id.clone(),
                token_key: ctx.token_key.clone(),
                entity_type: entity,
                mutations,
            };
            let key = workflow.key(now, bucket)?;
            map(
                executor
                    .submit(ExternalPushEntityWorkflow::NAME, key, workflow.execute(&ctx))
                    .await?,
                RunOutput::Push,
            )
        }
        SyncScope::Webhook { event } => {
            let workflow = WebhookWorkflow {
                adapter,
                org_id: ctx.org_id.clone(),
                token_key: ctx.token_key.clone(),
                event,
            };
            let key = workflow.key(now, bucket);
            map(
                executor
                    .submit(WebhookWorkflow::NAME, key, workflow.execute(&ctx))
                    .await?,
                RunOutput::Webhook,
            )
        }
    };
    Ok(submission)
}

fn map<T>(submission: Submission<T>, wrap: impl FnOnce(T) -> RunOutput) -> Submission<RunOutput> {
    match submission {
        Submission::Completed(value) => Submission::Completed(wrap(value)),
        Submission::Duplicate(record) => Submission::Duplicate(record),
    }
}
