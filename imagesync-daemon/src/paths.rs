use std::path::{Path, PathBuf};

pub const DAEMON_SOCKET: &str = "daemon.sock";

/// `<home>/.imagesync/`
pub fn imagesync_root(home: &Path) -> PathBuf {
    imagesync_core::credential_store::root_at(home)
}

pub fn socket_path(home: &Path) -> PathBuf {
    imagesync_root(home).join(DAEMON_SOCKET)
}
