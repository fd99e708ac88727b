//! Process settings: `~/.imagesync/config.yaml` overlaid with `IMAGESYNC_*` variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::credential_store::{home, root_at};
use crate::error::{io_err, ConfigError};
use crate::types::Credentials;

pub const DEFAULT_MAX_TASKS: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Pull/push tool; also hosts the `manifest` and `buildx` subcommands.
    pub docker_bin: String,
    /// Fast-copy tool.
    pub skopeo_bin: String,
    /// Use the fast-copy tool whenever the probe finds it.
    pub prefer_fast_copy: bool,
    /// Soft bound on retained task records.
    pub max_tasks: usize,
    /// Fail tasks whose pipeline runs longer than this.
    pub task_timeout_secs: Option<u64>,
    /// Fallback when neither a request nor `configure` supplied credentials.
    pub default_credentials: Option<Credentials>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            docker_bin: "docker".to_string(),
            skopeo_bin: "skopeo".to_string(),
            prefer_fast_copy: true,
            max_tasks: DEFAULT_MAX_TASKS,
            task_timeout_secs: None,
            default_credentials: None,
        }
    }
}

/// `<home>/.imagesync/config.yaml`
pub fn settings_path_at(home: &Path) -> PathBuf {
    root_at(home).join("config.yaml")
}

impl Settings {
    /// Read the settings file (if any) and apply process environment overrides.
    pub fn load_at(home: &Path) -> Result<Self, ConfigError> {
        let mut settings = Self::from_file_at(home)?;
        settings.apply_env(|key| std::env::var(key).ok())?;
        Ok(settings)
    }

    /// `load_at` convenience wrapper.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_at(&home()?)
    }

    pub fn from_file_at(home: &Path) -> Result<Self, ConfigError> {
        let path = settings_path_at(home);
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse { path, source: e })
    }

    /// Overlay `IMAGESYNC_*` values returned by `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(bin) = lookup("IMAGESYNC_DOCKER_BIN").filter(|v| !v.is_empty()) {
            self.docker_bin = bin;
        }
        if let Some(bin) = lookup("IMAGESYNC_SKOPEO_BIN").filter(|v| !v.is_empty()) {
            self.skopeo_bin = bin;
        }
        if let Some(value) = lookup("IMAGESYNC_PREFER_FAST_COPY") {
            self.prefer_fast_copy = parse_bool("IMAGESYNC_PREFER_FAST_COPY", &value)?;
        }
        if let Some(value) = lookup("IMAGESYNC_MAX_TASKS") {
            self.max_tasks = value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                key: "IMAGESYNC_MAX_TASKS",
                value: value.clone(),
            })?;
        }
        if let Some(value) = lookup("IMAGESYNC_TASK_TIMEOUT_SECS") {
            let secs: u64 = value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                key: "IMAGESYNC_TASK_TIMEOUT_SECS",
                value: value.clone(),
            })?;
            self.task_timeout_secs = (secs > 0).then_some(secs);
        }

        let registry = lookup("IMAGESYNC_REGISTRY").filter(|v| !v.is_empty());
        let username = lookup("IMAGESYNC_USERNAME").filter(|v| !v.is_empty());
        let password = lookup("IMAGESYNC_PASSWORD").filter(|v| !v.is_empty());
        if let (Some(registry), Some(username), Some(password)) = (registry, username, password) {
            self.default_credentials = Some(Credentials {
                registry,
                username,
                password,
            });
        }
        Ok(())
    }

    pub fn task_timeout(&self) -> Option<Duration> {
        self.task_timeout_secs.map(Duration::from_secs)
    }
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidEnv {
            key,
            value: value.to_string(),
        }),
    }
}
