//! Persisted destination credentials.
//!
//! # Storage layout
//!
//! ```text
//! ~/.imagesync/
//!   credentials.yaml   (mode 0600, directory 0700)
//! ```
//!
//! # API pattern
//!
//! Every function has two forms:
//! - `fn_at(home: &Path, …)`: explicit home; used in tests with `TempDir`
//! - `fn(…)`: derives home from `dirs::home_dir()`, delegates to `_at`

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{io_err, ConfigError};
use crate::types::Credentials;

const STORE_VERSION: u32 = 1;

/// On-disk payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialFile {
    pub version: u32,
    pub default: Credentials,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

/// `<home>/.imagesync/`
pub fn root_at(home: &Path) -> PathBuf {
    home.join(".imagesync")
}

/// `<home>/.imagesync/credentials.yaml`: pure, no I/O.
pub fn store_path_at(home: &Path) -> PathBuf {
    root_at(home).join("credentials.yaml")
}

// ---------------------------------------------------------------------------
// Load / save
// ---------------------------------------------------------------------------

/// Load the configured default credentials, `None` if none were ever saved.
pub fn load_at(home: &Path) -> Result<Option<Credentials>, ConfigError> {
    let path = store_path_at(home);
    if !path.exists() {
        return Ok(None);
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    let file: CredentialFile =
        serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse { path, source: e })?;
    Ok(Some(file.default))
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<Option<Credentials>, ConfigError> {
    load_at(&home()?)
}

/// Atomically replace the stored default credentials.
///
/// Write flow: serialize → `.yaml.tmp` sibling → `chmod 0600` → `rename`.
pub fn save_at(home: &Path, credentials: &Credentials) -> Result<(), ConfigError> {
    let dir = root_at(home);
    if !dir.exists() {
        std::fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        set_dir_permissions(&dir)?;
    }

    let path = store_path_at(home);
    let tmp = path.with_file_name("credentials.yaml.tmp");
    let file = CredentialFile {
        version: STORE_VERSION,
        default: credentials.clone(),
        updated_at: Utc::now(),
    };
    let yaml = serde_yaml::to_string(&file)?;
    std::fs::write(&tmp, yaml).map_err(|e| io_err(&tmp, e))?;
    set_file_permissions(&tmp)?;
    if let Err(e) = std::fs::rename(&tmp, &path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(io_err(&path, e));
    }
    Ok(())
}

/// `save_at` convenience wrapper.
pub fn save(credentials: &Credentials) -> Result<(), ConfigError> {
    save_at(&home()?, credentials)
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

pub(crate) fn home() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().ok_or(ConfigError::HomeNotFound)
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
