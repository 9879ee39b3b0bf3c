//! Explicit dependencies handed to every sync operation.
//!
//! [`Services`] is built once per process. A [`SyncContext`] binds it to one
//! run's organization, credential and resolved adapter.

use std::future::Future;
use std::sync::Arc;

use steward_adapter::{Adapter, AdapterError, AdapterRegistry, Reply, Route};
use steward_core::{
    AdapterKind, LinkRegistry, MemoryStore, OrgId, RelationshipRegistry, Settings, TokenKey,
};

use crate::error::SyncError;
use crate::ledger::{MemoryLedger, RunLedger};
use crate::limiter::RateLimiter;
use crate::sink::EntitySink;
use crate::workflow::Executor;

#[derive(Clone)]
pub struct Services {
    pub adapters: AdapterRegistry,
    pub links: LinkRegistry,
    pub relationships: RelationshipRegistry,
    pub limiter: Arc<RateLimiter>,
    pub sink: Arc<dyn EntitySink>,
    pub executor: Executor,
    pub settings: Arc<Settings>,
}

impl Services {
    /// Everything in-process: one [`MemoryStore`] behind both registries, an
    /// in-memory limiter and ledger.
    pub fn in_memory(
        store: Arc<MemoryStore>,
        adapters: AdapterRegistry,
        sink: Arc<dyn EntitySink>,
        settings: Settings,
    ) -> Self {
        let ledger: Arc<dyn RunLedger> = Arc::new(MemoryLedger::new());
        Self {
            adapters,
            links: LinkRegistry::new(store.clone()),
            relationships: RelationshipRegistry::new(store),
            limiter: Arc::new(RateLimiter::in_memory(settings.limiter.clone())),
            sink,
            executor: Executor::new(ledger),
            settings: Arc::new(settings),
        }
    }

    /// Resolve the adapter for `tag` and bind a context to it.
    pub async fn context(
        &self,
        tag: &str,
        org_id: OrgId,
        token_key: TokenKey,
    ) -> Result<SyncContext, SyncError> {
        let adapter = self.adapters.resolve(tag, &token_key).await?;
        Ok(self.bind(adapter, org_id, token_key))
    }

    pub fn bind(&self, adapter: Arc<dyn Adapter>, org_id: OrgId, token_key: TokenKey) -> SyncContext {
        SyncContext {
            org_id,
            token_key,
            adapter,
            links: self.links.clone(),
            relationships: self.relationships.clone(),
            limiter: self.limiter.clone(),
            sink: self.sink.clone(),
            settings: self.settings.clone(),
        }
    }
}

#[derive(Clone)]
pub struct SyncContext {
    pub org_id: OrgId,
    pub token_key: TokenKey,
    pub adapter: Arc<dyn Adapter>,
    pub links: LinkRegistry,
    pub relationships: RelationshipRegistry,
    pub limiter: Arc<RateLimiter>,
    pub sink: Arc<dyn EntitySink>,
    pub settings: Arc<Settings>,
}

impl SyncContext {
    pub fn kind(&self) -> AdapterKind {
        self.adapter.kind()
    }

    /// Throttle on `route`, await `call`, and feed any bucket hint on the
    /// reply back into the limiter.
    pub async fn throttled<T, F>(&self, route: &Route, call: F) -> Result<T, SyncError>
    where
        F: Future<Output = Result<Reply<T>, AdapterError>>,
    {
        self.limiter.throttle(route).await?;
        let reply = call.await?;
        if let Some(hint) = &reply.bucket {
            if let Err(err) = self.limiter.observe(route, hint) {
                tracing::warn!(%route, error = %err, "could not record bucket hint");
            }
        }
        Ok(reply.value)
    }
}
