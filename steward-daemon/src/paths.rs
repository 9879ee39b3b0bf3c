use std::path::{Path, PathBuf};

use steward_core::paths::steward_root;

pub const DAEMON_SOCKET: &str = "daemon.sock";

pub fn socket_path(home: &Path) -> PathBuf {
    steward_root(home).join(DAEMON_SOCKET)
}
