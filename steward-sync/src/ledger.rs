//! Run ledger: the client side of the durable workflow substrate.
//!
//! Every workflow run is recorded under an [`IdempotencyKey`]. Admission is
//! atomic: a key that is queued, running or already succeeded is reported as
//! a duplicate instead of being run twice. A failed key may be admitted
//! again, which starts the next attempt.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{ErrorKind, SyncError};

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

/// `<workflow>:<sha256 of inputs and time bucket>`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Derive a key from the workflow name, its identifying inputs and the
    /// `bucket`-wide time slot containing `at`.
    pub fn derive(workflow: &str, parts: &[&str], at: DateTime<Utc>, bucket: Duration) -> Self {
        let width = bucket.as_secs().max(1) as i64;
        let slot = at.timestamp().div_euclid(width);
        let mut hasher = Sha256::new();
        hasher.update(workflow.as_bytes());
        for part in parts {
            hasher.update([0u8]);
            hasher.update(part.as_bytes());
        }
        hasher.update([0u8]);
        hasher.update(slot.to_string().as_bytes());
        Self(format!("{workflow}:{}", hex::encode(hasher.finalize())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for IdempotencyKey {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Hex SHA-256 of arbitrary bytes, for folding payloads into key parts.
pub fn digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunState {
    Queued,
    Running,
    Succeeded,
    Failed { kind: ErrorKind, message: String },
}

impl RunState {
    /// States that block a new run under the same key.
    pub fn is_live_or_done(&self) -> bool {
        !matches!(self, RunState::Failed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    pub key: IdempotencyKey,
    pub workflow: String,
    #[serde(flatten)]
    pub state: RunState,
    pub attempt: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Admitted { attempt: u32 },
    Duplicate(RunRecord),
}

#[async_trait]
pub trait RunLedger: Send + Sync {
    /// Atomically admit `key` as `Queued`, or report the blocking record.
    async fn admit(&self, key: &IdempotencyKey, workflow: &str) -> Result<Admission, SyncError>;

    async fn start(&self, key: &IdempotencyKey) -> Result<(), SyncError>;

    /// Record the final state. `None` means success.
    async fn finish(
        &self,
        key: &IdempotencyKey,
        failure: Option<(ErrorKind, String)>,
    ) -> Result<(), SyncError>;

    async fn get(&self, key: &IdempotencyKey) -> Result<Option<RunRecord>, SyncError>;

    /// All runs, most recently updated first.
    async fn list(&self) -> Result<Vec<RunRecord>, SyncError>;
}

#[derive(Default)]
pub struct MemoryLedger {
    runs: Mutex<BTreeMap<IdempotencyKey, RunRecord>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, BTreeMap<IdempotencyKey, RunRecord>>, SyncError> {
        self.runs
            .lock()
            .map_err(|_| SyncError::Substrate("run ledger lock poisoned".into()))
    }

    fn transition(&self, key: &IdempotencyKey, state: RunState) -> Result<(), SyncError> {
        let mut runs = self.lock()?;
        let record = runs
            .get_mut(key)
            .ok_or_else(|| SyncError::Substrate(format!("unknown run {key}")))?;
        record.state = state;
        record.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl RunLedger for MemoryLedger {
    async fn admit(&self, key: &IdempotencyKey, workflow: &str) -> Result<Admission, SyncError> {
        let mut runs = self.lock()?;
        let now = Utc::now();
        match runs.get_mut(key) {
            Some(existing) if existing.state.is_live_or_done() => {
                Ok(Admission::Duplicate(existing.clone()))
            }
            Some(failed) => {
                failed.attempt += 1;
                failed.state = RunState::Queued;
                failed.updated_at = now;
                Ok(Admission::Admitted {
                    attempt: failed.attempt,
                })
            }
            None => {
                runs.insert(
                    key.clone(),
                    RunRecord {
                        key: key.clone(),
                        workflow: workflow.to_owned(),
                        state: RunState::Queued,
                        attempt: 1,
                        created_at: now,
                        updated_at: now,
                    },
                );
                Ok(Admission::Admitted { attempt: 1 })
            }
        }
    }

    async fn start(&self, key: &IdempotencyKey) -> Result<(), SyncError> {
        self.transition(key, RunState::Running)
    }

    async fn finish(
        &self,
        key: &IdempotencyKey,
        failure: Option<(ErrorKind, String)>,
    ) -> Result<(), SyncError> {
        let state = match failure {
            None => RunState::Succeeded,
            Some((kind, message)) => RunState::Failed { kind, message },
        };
        self.transition(key, state)
    }

    async fn get(&self, key: &IdempotencyKey) -> Result<Option<RunRecord>, SyncError> {
        Ok(self.lock()?.get(key).cloned())
    }

    async fn list(&self) -> Result<Vec<RunRecord>, SyncError> {
        let mut runs: Vec<RunRecord> = self.lock()?.values().cloned().collect();
        runs.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(runs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().expect("valid timestamp")
    }

    #[test]
    fn keys_are_stable_within_a_bucket() {
        let bucket = Duration::from_secs(300);
        let a = IdempotencyKey::derive("sync", &["pco", "org"], at(600), bucket);
        let b = IdempotencyKey::derive("sync", &["pco", "org"], at(899), bucket);
        let c = IdempotencyKey::derive("sync", &["pco", "org"], at(900), bucket);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.as_str().starts_with("sync:"));
    }

    #[test]
    fn part_boundaries_matter() {
        let bucket = Duration::from_secs(300);
        let a = IdempotencyKey::derive("sync", &["ab", "c"], at(0), bucket);
        let b = IdempotencyKey::derive("sync", &["a", "bc"], at(0), bucket);
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn duplicate_admission_is_rejected_until_failure() {
        let ledger = MemoryLedger::new();
        let key = IdempotencyKey::from("sync:k");

        assert_eq!(
            ledger.admit(&key, "sync").await.expect("admit"),
            Admission::Admitted { attempt: 1 }
        );
        ledger.start(&key).await.expect("start");
        assert!(matches!(
            ledger.admit(&key, "sync").await.expect("admit"),
            Admission::Duplicate(RunRecord { state: RunState::Running, .. })
        ));

        ledger
            .finish(&key, Some((ErrorKind::Fetch, "503".into())))
            .await
            .expect("finish");
        assert_eq!(
            ledger.admit(&key, "sync").await.expect("readmit"),
            Admission::Admitted { attempt: 2 }
        );

        ledger.start(&key).await.expect("start");
        ledger.finish(&key, None).await.expect("finish");
        assert!(matches!(
            ledger.admit(&key, "sync").await.expect("admit"),
            Admission::Duplicate(RunRecord { state: RunState::Succeeded, attempt: 2, .. })
        ));
    }
}
