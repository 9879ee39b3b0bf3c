//! Filesystem layout under `<home>/.steward/`.

use std::path::{Path, PathBuf};

use crate::error::{io_err, RegistryError};

pub fn steward_root(home: &Path) -> PathBuf {
    home.join(".steward")
}

pub fn config_path(home: &Path) -> PathBuf {
    steward_root(home).join("config.yaml")
}

pub fn state_dir(home: &Path) -> PathBuf {
    steward_root(home).join("state")
}

pub fn home() -> Result<PathBuf, RegistryError> {
    dirs::home_dir().ok_or(RegistryError::HomeNotFound)
}

/// Create `dir` (mode `0700`) if it does not exist yet.
pub fn ensure_dir(dir: &Path) -> Result<PathBuf, RegistryError> {
    if !dir.exists() {
        std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
        set_dir_permissions(dir)?;
    }
    Ok(dir.to_path_buf())
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), RegistryError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), RegistryError> {
    Ok(())
}

#[cfg(unix)]
pub(crate) fn set_file_permissions(path: &Path) -> Result<(), RegistryError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
pub(crate) fn set_file_permissions(_path: &Path) -> Result<(), RegistryError> {
    Ok(())
}
