//! Runtime settings, read from `<home>/.steward/config.yaml`.
//!
//! Every field has a default, so a missing file or a partial file is valid.
//! A file that exists but does not parse is an error carrying its path.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{io_err, RegistryError};
use crate::paths;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Records requested per external list call.
    pub page_size: usize,
    /// Records of one page processed at the same time.
    pub record_concurrency: usize,
    pub retry: RetrySettings,
    pub limiter: LimiterSettings,
    /// A link left `syncing` longer than this is considered stuck.
    pub stale_after_secs: u64,
    /// Width of the timestamp bucket folded into idempotency keys.
    pub idempotency_bucket_secs: u64,
    /// Daemon maintenance cadence (stuck-link sweep + snapshot).
    pub maintenance_interval_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            page_size: 100,
            record_concurrency: 8,
            retry: RetrySettings::default(),
            limiter: LimiterSettings::default(),
            stale_after_secs: 15 * 60,
            idempotency_bucket_secs: 300,
            maintenance_interval_secs: 30,
        }
    }
}

impl Settings {
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    pub fn idempotency_bucket(&self) -> Duration {
        Duration::from_secs(self.idempotency_bucket_secs.max(1))
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_secs.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub activity_timeout_secs: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 10_000,
            activity_timeout_secs: 120,
        }
    }
}

/// Static budgets used until the external API reports its real buckets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimiterSettings {
    /// Window stretch absorbing clock skew with the remote server.
    pub safety_multiplier: f64,
    pub global_limit: u32,
    pub global_window_ms: u64,
    pub route_limit: u32,
    pub route_window_ms: u64,
}

impl Default for LimiterSettings {
    fn default() -> Self {
        Self {
            safety_multiplier: 1.05,
            global_limit: 100,
            global_window_ms: 20_000,
            route_limit: 100,
            route_window_ms: 20_000,
        }
    }
}

/// Load settings from `<home>/.steward/config.yaml`, defaulting when absent.
pub fn load_at(home: &Path) -> Result<Settings, RegistryError> {
    let path = paths::config_path(home);
    if !path.exists() {
        return Ok(Settings::default());
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    if contents.trim().is_empty() {
        return Ok(Settings::default());
    }
    serde_yaml::from_str(&contents).map_err(|e| RegistryError::Parse {
        path,
        message: e.to_string(),
    })
}

pub fn load() -> Result<Settings, RegistryError> {
    load_at(&paths::home()?)
}
