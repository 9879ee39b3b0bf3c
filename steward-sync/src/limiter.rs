//! Adaptive rate limiter.
//!
//! Every outbound adapter call first throttles on two sliding-window
//! counters: the shared `"global"` bucket and the bucket governing the call's
//! route. Budgets start from [`LimiterSettings`]; once the external API
//! reports its real bucket for a route, [`RateLimiter::observe`] records it and
//! later calls on that route count against the reported bucket.
//!
//! Windows are stretched by `safety_multiplier` to absorb clock skew with the
//! remote side. Waits are unbounded: a throttled call always proceeds, it just
//! proceeds later.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use steward_adapter::{BucketHint, Route};
use steward_core::config::LimiterSettings;

use crate::error::LimiterError;

/// Key of the bucket shared by every route.
pub const GLOBAL_BUCKET: &str = "global";

/// Counter state after one increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Counter {
    pub count: u64,
    /// Time until the window resets.
    pub ttl: Duration,
}

/// Shared counter storage. `incr` is a single atomic increment-and-read that
/// opens a new window of length `window` when none is live.
#[async_trait]
pub trait CounterStore: Send + Sync {
    async fn incr(&self, key: &str, window: Duration) -> Result<Counter, LimiterError>;
}

struct Window {
    count: u64,
    expires_at: Instant,
}

/// In-process [`CounterStore`]. Uses tokio's clock so paused-time tests see
/// windows expire.
#[derive(Default)]
pub struct MemoryCounterStore {
    windows: Mutex<HashMap<String, Window>>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn incr(&self, key: &str, window: Duration) -> Result<Counter, LimiterError> {
        let mut windows = self
            .windows
            .lock()
            .map_err(|_| LimiterError::Unavailable("counter lock poisoned".into()))?;
        let now = Instant::now();
        windows.retain(|_, w| w.expires_at > now);
        let entry = windows.entry(key.to_owned()).or_insert_with(|| Window {
            count: 0,
            expires_at: now + window,
        });
        entry.count += 1;
        Ok(Counter {
            count: entry.count,
            ttl: entry.expires_at.saturating_duration_since(now),
        })
    }
}

/// A budget: at most `limit` calls per `reset_after`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bucket {
    pub key: String,
    pub limit: u32,
    pub reset_after: Duration,
}

pub struct RateLimiter {
    counters: Arc<dyn CounterStore>,
    settings: LimiterSettings,
    buckets: RwLock<HashMap<String, Bucket>>,
    routes: RwLock<HashMap<Route, String>>,
}

impl RateLimiter {
    pub fn new(counters: Arc<dyn CounterStore>, settings: LimiterSettings) -> Self {
        Self {
            counters,
            settings,
            buckets: RwLock::new(HashMap::new()),
            routes: RwLock::new(HashMap::new()),
        }
    }

    pub fn in_memory(settings: LimiterSettings) -> Self {
        Self::new(Arc::new(MemoryCounterStore::new()), settings)
    }

    /// Count one call against `key` and return how long the caller must wait.
    /// Zero while the window still has budget, otherwise the window's
    /// remaining lifetime.
    pub async fn acquire(
        &self,
        key: &str,
        window: Duration,
        limit: u32,
    ) -> Result<Duration, LimiterError> {
        let stretched = window.mul_f64(self.settings.safety_multiplier.max(1.0));
        let counter = self.counters.incr(key, stretched).await?;
        if counter.count > u64::from(limit) {
            Ok(counter.ttl)
        } else {
            Ok(Duration::ZERO)
        }
    }

    pub fn put_bucket(
        &self,
        key: &str,
        limit: u32,
        reset_after: Duration,
    ) -> Result<(), LimiterError> {
        let mut buckets = self
            .buckets
            .write()
            .map_err(|_| LimiterError::Unavailable("bucket table lock poisoned".into()))?;
        buckets.insert(
            key.to_owned(),
            Bucket {
                key: key.to_owned(),
                limit,
                reset_after,
            },
        );
        Ok(())
    }

    pub fn put_bucket_route(&self, route: &Route, key: &str) -> Result<(), LimiterError> {
        let mut routes = self
            .routes
            .write()
            .map_err(|_| LimiterError::Unavailable("route table lock poisoned".into()))?;
        routes.insert(route.clone(), key.to_owned());
        Ok(())
    }

    /// Record the bucket an API response reported for `route`.
    pub fn observe(&self, route: &Route, hint: &BucketHint) -> Result<(), LimiterError> {
        self.put_bucket(&hint.bucket, hint.limit, hint.reset_after)?;
        self.put_bucket_route(route, &hint.bucket)?;
        tracing::debug!(%route, bucket = %hint.bucket, limit = hint.limit, "bucket discovered");
        Ok(())
    }

    /// Bucket governing `route`: the discovered one if any, otherwise a
    /// route-named bucket with the configured defaults.
    pub fn bucket_for(&self, route: &Route) -> Result<Bucket, LimiterError> {
        let routes = self
            .routes
            .read()
            .map_err(|_| LimiterError::Unavailable("route table lock poisoned".into()))?;
        if let Some(key) = routes.get(route) {
            let buckets = self
                .buckets
                .read()
                .map_err(|_| LimiterError::Unavailable("bucket table lock poisoned".into()))?;
            if let Some(bucket) = buckets.get(key) {
                return Ok(bucket.clone());
            }
        }
        Ok(Bucket {
            key: route.to_string(),
            limit: self.settings.route_limit,
            reset_after: Duration::from_millis(self.settings.route_window_ms),
        })
    }

    /// Budget of the shared bucket: the discovered one if the API reported
    /// it, otherwise the configured global defaults.
    pub fn global_bucket(&self) -> Result<Bucket, LimiterError> {
        let buckets = self
            .buckets
            .read()
            .map_err(|_| LimiterError::Unavailable("bucket table lock poisoned".into()))?;
        Ok(buckets.get(GLOBAL_BUCKET).cloned().unwrap_or_else(|| Bucket {
            key: GLOBAL_BUCKET.to_owned(),
            limit: self.settings.global_limit,
            reset_after: Duration::from_millis(self.settings.global_window_ms),
        }))
    }

    /// Wait until both the global and the route bucket admit a call. Returns
    /// the delay that was slept. A route governed by the global bucket counts
    /// once.
    pub async fn throttle(&self, route: &Route) -> Result<Duration, LimiterError> {
        let bucket = self.bucket_for(route)?;
        let global = self.global_bucket()?;
        let mut delay = self
            .acquire(&global.key, global.reset_after, global.limit)
            .await?;
        if bucket.key != GLOBAL_BUCKET {
            let local = self
                .acquire(&bucket.key, bucket.reset_after, bucket.limit)
                .await?;
            delay = delay.max(local);
        }
        if !delay.is_zero() {
            tracing::debug!(%route, bucket = %bucket.key, delay_ms = delay.as_millis() as u64, "throttling");
            tokio::time::sleep(delay).await;
        }
        Ok(delay)
    }
}
