//! On-disk snapshot of the link and relationship tables.
//!
//! # Storage layout
//!
//! ```text
//! ~/.steward/
//!   config.yaml
//!   state/
//!     store.json      (mode 0600, written via .tmp + rename)
//! ```
//!
//! Every function takes an explicit `home`; the no-arg wrappers derive it from
//! `dirs::home_dir()`.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{io_err, RegistryError};
use crate::paths;
use crate::types::{EntityRelationship, ExternalLink};

pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    #[serde(default)]
    pub links: Vec<ExternalLink>,
    #[serde(default)]
    pub relationships: Vec<EntityRelationship>,
}

impl StoreSnapshot {
    pub fn new(links: Vec<ExternalLink>, relationships: Vec<EntityRelationship>) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            saved_at: Utc::now(),
            links,
            relationships,
        }
    }

    pub fn empty() -> Self {
        Self::new(vec![], vec![])
    }
}

/// `<home>/.steward/state/store.json`. Pure, no I/O.
pub fn snapshot_path_at(home: &Path) -> PathBuf {
    paths::state_dir(home).join("store.json")
}

/// Load the snapshot, or an empty one if none has been written yet.
pub fn load_at(home: &Path) -> Result<StoreSnapshot, RegistryError> {
    let path = snapshot_path_at(home);
    if !path.exists() {
        return Ok(StoreSnapshot::empty());
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    serde_json::from_str(&contents).map_err(|e| RegistryError::Parse {
        path,
        message: e.to_string(),
    })
}

pub fn load() -> Result<StoreSnapshot, RegistryError> {
    load_at(&paths::home()?)
}

/// Atomically write the snapshot.
///
/// Write flow: serialize → `store.json.tmp` sibling → `chmod 0600` → `rename`.
pub fn save_at(home: &Path, snapshot: &StoreSnapshot) -> Result<(), RegistryError> {
    let dir = paths::ensure_dir(&paths::state_dir(home))?;
    let path = dir.join("store.json");
    let tmp = dir.join("store.json.tmp");

    let json = serde_json::to_string_pretty(snapshot)?;
    std::fs::write(&tmp, json).map_err(|e| io_err(&tmp, e))?;
    paths::set_file_permissions(&tmp)?;
    if let Err(e) = std::fs::rename(&tmp, &path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(io_err(&path, e));
    }
    tracing::debug!(
        path = %path.display(),
        links = snapshot.links.len(),
        relationships = snapshot.relationships.len(),
        "store snapshot saved"
    );
    Ok(())
}

pub fn save(snapshot: &StoreSnapshot) -> Result<(), RegistryError> {
    save_at(&paths::home()?, snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AdapterKind, EntityId, EntityType, ExternalId, OrgId};
    use tempfile::TempDir;

    fn sample() -> StoreSnapshot {
        let link = ExternalLink::new(
            OrgId::from("org"),
            AdapterKind::Ccb,
            EntityType::from("group"),
            EntityId::from("grp_1"),
            ExternalId::from("501"),
            Utc::now(),
        );
        StoreSnapshot::new(vec![link], vec![])
    }

    #[test]
    fn missing_snapshot_loads_empty() {
        let home = TempDir::new().unwrap();
        let snapshot = load_at(home.path()).expect("load");
        assert!(snapshot.links.is_empty());
        assert_eq!(snapshot.version, SNAPSHOT_VERSION);
    }

    #[test]
    fn save_and_load_roundtrip() {
        let home = TempDir::new().unwrap();
        let snapshot = sample();
        save_at(home.path(), &snapshot).expect("save");
        let loaded = load_at(home.path()).expect("load");
        assert_eq!(loaded.links, snapshot.links);
    }

    #[test]
    fn tmp_file_removed_after_save() {
        let home = TempDir::new().unwrap();
        save_at(home.path(), &sample()).expect("save");
        let tmp = snapshot_path_at(home.path()).with_file_name("store.json.tmp");
        assert!(!tmp.exists(), ".tmp must be gone after rename");
    }

    #[cfg(unix)]
    #[test]
    fn snapshot_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let home = TempDir::new().unwrap();
        save_at(home.path(), &sample()).expect("save");
        let mode = std::fs::metadata(snapshot_path_at(home.path()))
            .unwrap()
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(mode, 0o600);
    }

    #[test]
    fn corrupt_snapshot_reports_path() {
        let home = TempDir::new().unwrap();
        let path = snapshot_path_at(home.path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{ not json").unwrap();
        let err = load_at(home.path()).unwrap_err();
        assert!(matches!(err, RegistryError::Parse { .. }));
        assert!(err.to_string().contains("store.json"));
    }
}
