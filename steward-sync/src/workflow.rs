//! Sync workflows and the executor that runs them under the ledger.
//!
//! Workflows are plain async functions over a [`SyncContext`]. Each external
//! call they make is an activity ([`run_activity`]) so transient failures are
//! retried without re-running the whole workflow.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};

use steward_adapter::{descriptor_for, detect_event, ListParams, Method, Page};
use steward_core::{AdapterKind, EntityType, ExternalId, ExternalLink, OrgId, TokenKey};

use crate::activity::{run_activity, RetryPolicy};
use crate::chain::{process_mutation, Mutation, MutationOutcome};
use crate::context::SyncContext;
use crate::error::SyncError;
use crate::ledger::{digest, Admission, IdempotencyKey, RunLedger, RunRecord};
use crate::pull::{pull_page, PageReport};

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "submission", content = "detail", rename_all = "snake_case")]
pub enum Submission<T> {
    Completed(T),
    /// Another run already holds (or completed) this key.
    Duplicate(RunRecord),
}

#[derive(Clone)]
pub struct Executor {
    ledger: Arc<dyn RunLedger>,
}

impl Executor {
    pub fn new(ledger: Arc<dyn RunLedger>) -> Self {
        Self { ledger }
    }

    pub fn ledger(&self) -> &Arc<dyn RunLedger> {
        &self.ledger
    }

    /// Run `body` once per key. The outcome is written to the ledger before
    /// returning.
    pub async fn submit<T, F>(
        &self,
        workflow: &str,
        key: IdempotencyKey,
        body: F,
    ) -> Result<Submission<T>, SyncError>
    where
        F: Future<Output = Result<T, SyncError>>,
    {
        let attempt = match self.ledger.admit(&key, workflow).await? {
            Admission::Admitted { attempt } => attempt,
            Admission::Duplicate(record) => {
                tracing::info!(workflow, %key, state = ?record.state, "duplicate submission ignored");
                return Ok(Submission::Duplicate(record));
            }
        };
        self.ledger.start(&key).await?;
        tracing::info!(workflow, %key, attempt, "workflow started");

        let result = body.await;
        let failure = result.as_ref().err().map(|err| (err.kind(), err.to_string()));
        match &failure {
            None => tracing::info!(workflow, %key, "workflow succeeded"),
            Some((kind, message)) => {
                tracing::error!(workflow, %key, %kind, error = %message, "workflow failed")
            }
        }
        let recorded = self.ledger.finish(&key, failure).await;
        let value = result?;
        recorded?;
        Ok(Submission::Completed(value))
    }
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityReport {
    pub entity_type: EntityType,
    pub pages: usize,
    #[serde(flatten)]
    pub totals: PageReport,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub entities: Vec<EntityReport>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushReport {
    pub outcomes: Vec<MutationOutcome>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum WebhookOutcome {
    Synced { report: PageReport },
    /// The external system no longer has the record.
    Missing,
    /// `link` is `None` when the record was never linked.
    Unlinked { link: Option<ExternalLink> },
}

// ---------------------------------------------------------------------------
// Workflows
// ---------------------------------------------------------------------------

/// Full pull of every syncable entity type, one type at a time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncWorkflow {
    pub adapter: AdapterKind,
    pub org_id: OrgId,
    pub token_key: TokenKey,
    /// Restrict the run to these types, in this order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entities: Option<Vec<EntityType>>,
}

impl SyncWorkflow {
    pub const NAME: &'static str = "sync";

    pub fn key(&self, at: DateTime<Utc>, bucket: std::time::Duration) -> IdempotencyKey {
        let entities = self
            .entities
            .as_ref()
            .map(|list| {
                list.iter()
                    .map(EntityType::as_str)
                    .collect::<Vec<_>>()
                    .join(",")
            })
            .unwrap_or_else(|| "*".into());
        IdempotencyKey::derive(
            Self::NAME,
            &[
                self.adapter.as_str(),
                self.token_key.as_str(),
                self.org_id.as_str(),
                &entities,
            ],
            at,
            bucket,
        )
    }

    /// Entity types this run walks.
    pub fn plan(&self, ctx: &SyncContext) -> Result<Vec<EntityType>, SyncError> {
        let manifest = ctx.adapter.manifest();
        match &self.entities {
            None => Ok(manifest.syncable()),
            Some(requested) => {
                for entity_type in requested {
                    descriptor_for(manifest, entity_type)?;
                    manifest.route(entity_type, Method::List)?;
                }
                Ok(requested.clone())
            }
        }
    }

    pub async fn execute(&self, ctx: &SyncContext) -> Result<SyncReport, SyncError> {
        let plan = self.plan(ctx)?;
        tracing::info!(org = %self.org_id, adapter = %self.adapter, entities = plan.len(), "pull sync starting");
        let mut report = SyncReport::default();
        for entity_type in plan {
            let child = InternalSyncWorkflow {
                adapter: self.adapter,
                org_id: self.org_id.clone(),
                token_key: self.token_key.clone(),
                entity_type,
            };
            report.entities.push(child.execute(ctx).await?);
        }
        Ok(report)
    }
}

/// Pull of a single entity type, page by page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InternalSyncWorkflow {
    pub adapter: AdapterKind,
    pub org_id: OrgId,
    pub token_key: TokenKey,
    pub entity_type: EntityType,
}

impl InternalSyncWorkflow {
    pub const NAME: &'static str = "internal_sync";

    pub fn key(&self, at: DateTime<Utc>, bucket: std::time::Duration) -> IdempotencyKey {
        IdempotencyKey::derive(
            Self::NAME,
            &[
                self.adapter.as_str(),
                self.token_key.as_str(),
                self.org_id.as_str(),
                self.entity_type.as_str(),
            ],
            at,
            bucket,
        )
    }

    pub async fn execute(&self, ctx: &SyncContext) -> Result<EntityReport, SyncError> {
        let manifest = ctx.adapter.manifest();
        let descriptor = descriptor_for(manifest, &self.entity_type)?;
        let route = manifest.route(&self.entity_type, Method::List)?.clone();
        let policy = RetryPolicy::from(&ctx.settings.retry);
        let page_size = ctx.settings.page_size.max(1);

        let mut report = EntityReport {
            entity_type: self.entity_type.clone(),
            pages: 0,
            totals: PageReport::default(),
        };
        let mut cursor: Option<String> = None;
        loop {
            report.pages += 1;
            let name = format!("pull:{}:page:{}", self.entity_type, report.pages);
            let page: Page = {
                let (route, entity_type, cursor) = (&route, &self.entity_type, &cursor);
                run_activity(&name, &policy, move |_| {
                    ctx.throttled(
                        route,
                        ctx.adapter.list(
                            entity_type,
                            ListParams {
                                page_size,
                                cursor: cursor.clone(),
                            },
                        ),
                    )
                })
                .await?
            };
            let Page {
                records,
                next_cursor,
            } = page;
            report.totals.absorb(pull_page(ctx, descriptor, records).await?);
            match next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        tracing::info!(
            org = %self.org_id,
            entity_type = %self.entity_type,
            pages = report.pages,
            fetched = report.totals.fetched,
            failed = report.totals.failed,
            "entity pull finished"
        );
        Ok(report)
    }
}

/// Push a batch of mutations of one entity type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalPushEntityWorkflow {
    pub adapter: AdapterKind,
    pub org_id: OrgId,
    pub token_key: TokenKey,
    pub entity_type: EntityType,
    pub mutations: Vec<Mutation>,
}

impl ExternalPushEntityWorkflow {
    pub const NAME: &'static str = "push_entity";

    /// Includes a digest of the batch so distinct batches in the same time
    /// bucket do not collide.
    pub fn key(
        &self,
        at: DateTime<Utc>,
        bucket: std::time::Duration,
    ) -> Result<IdempotencyKey, SyncError> {
        let batch = serde_json::to_vec(&self.mutations)
            .map_err(|e| SyncError::Substrate(format!("could not encode mutation batch: {e}")))?;
        Ok(IdempotencyKey::derive(
            Self::NAME,
            &[
                self.adapter.as_str(),
                self.token_key.as_str(),
                self.org_id.as_str(),
                self.entity_type.as_str(),
                &digest(&batch),
            ],
            at,
            bucket,
        ))
    }

    /// Every mutation runs concurrently as its own activity. All of them are
    /// awaited; the first failure in batch order is returned.
    pub async fn execute(&self, ctx: &SyncContext) -> Result<PushReport, SyncError> {
        let policy = RetryPolicy::from(&ctx.settings.retry);
        let names: Vec<String> = (0..self.mutations.len())
            .map(|i| format!("push:{}:{i}", self.entity_type))
            .collect();
        let results = join_all(self.mutations.iter().zip(&names).map(|(mutation, name)| {
            run_activity(name, &policy, move |_| process_mutation(ctx, mutation))
        }))
        .await;

        let mut report = PushReport::default();
        let mut first_error = None;
        for result in results {
            match result {
                Ok(outcome) => report.outcomes.push(outcome),
                Err(err) if first_error.is_none() => first_error = Some(err),
                Err(err) => tracing::warn!(error = %err, "additional push failure"),
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(report),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebhookOperation {
    Upsert,
    Delete,
}

impl WebhookOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookOperation::Upsert => "upsert",
            WebhookOperation::Delete => "delete",
        }
    }
}

/// A change notification pushed by the external system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub event_type: String,
    pub external_id: ExternalId,
    pub operation: WebhookOperation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookWorkflow {
    pub adapter: AdapterKind,
    pub org_id: OrgId,
    pub token_key: TokenKey,
    pub event: WebhookEvent,
}

impl WebhookWorkflow {
    pub const NAME: &'static str = "webhook";

    pub fn key(&self, at: DateTime<Utc>, bucket: std::time::Duration) -> IdempotencyKey {
        IdempotencyKey::derive(
            Self::NAME,
            &[
                self.adapter.as_str(),
                self.token_key.as_str(),
                self.org_id.as_str(),
                &self.event.event_type,
                self.event.external_id.as_str(),
                self.event.operation.as_str(),
            ],
            at,
            bucket,
        )
    }

    pub async fn execute(&self, ctx: &SyncContext) -> Result<WebhookOutcome, SyncError> {
        let manifest = ctx.adapter.manifest();
        let descriptor = detect_event(manifest, &self.event.event_type)?;
        let entity_type = descriptor.entity_type();
        let external_id = &self.event.external_id;

        match self.event.operation {
            WebhookOperation::Upsert => {
                let route = manifest.route(&entity_type, Method::Fetch)?.clone();
                let policy = RetryPolicy::from(&ctx.settings.retry);
                let name = format!("webhook:{entity_type}:fetch");
                let record = {
                    let (route, entity_type) = (&route, &entity_type);
                    run_activity(&name, &policy, move |_| {
                        ctx.throttled(route, ctx.adapter.fetch(entity_type, external_id))
                    })
                    .await?
                };
                match record {
                    Some(record) => Ok(WebhookOutcome::Synced {
                        report: pull_page(ctx, descriptor, vec![record]).await?,
                    }),
                    None => {
                        tracing::debug!(%entity_type, %external_id, "webhook record no longer exists");
                        Ok(WebhookOutcome::Missing)
                    }
                }
            }
            WebhookOperation::Delete => {
                let link = ctx
                    .links
                    .find_by_external_id(&ctx.org_id, ctx.kind(), external_id)
                    .await
                    .map_err(SyncError::LinkRetrieval)?;
                let Some(link) = link else {
                    tracing::debug!(%entity_type, %external_id, "delete for unlinked record");
                    return Ok(WebhookOutcome::Unlinked { link: None });
                };
                ctx.sink
                    .remove(&ctx.org_id, &link.entity_type, &link.entity_id)
                    .await?;
                let removed = ctx
                    .links
                    .delete(&ctx.org_id, ctx.kind(), external_id)
                    .await
                    .map_err(SyncError::LinkUpsert)?;
                Ok(WebhookOutcome::Unlinked { link: removed })
            }
        }
    }
}
