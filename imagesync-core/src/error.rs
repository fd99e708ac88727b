//! Error types for imagesync-core.

use std::path::PathBuf;

use thiserror::Error;

/// A sync request was rejected before any task was created.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("source image reference is required")]
    MissingSource,

    #[error("destination registry host is required")]
    MissingRegistry,

    #[error("at least one target platform is required")]
    NoPlatforms,

    /// The reference could not be split into registry/repository/tag.
    #[error("invalid image reference '{reference}': {reason}")]
    InvalidReference { reference: String, reason: String },

    #[error("invalid platform '{value}'; expected os/arch[/variant], e.g. linux/amd64")]
    InvalidPlatform { value: String },

    #[error("invalid destination {field} '{value}'")]
    InvalidDestination { field: &'static str, value: String },

    /// Per-request credentials must carry both halves.
    #[error("per-request credentials need both a username and a password")]
    IncompleteCredentials,
}

/// Errors from the persisted credential store and settings file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Underlying I/O failure (permission denied, read-only filesystem, etc.).
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML serialization error (write path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// YAML parse error on load, with the offending file.
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// An environment override held a value of the wrong shape.
    #[error("invalid value for {key}: '{value}'")]
    InvalidEnv { key: &'static str, value: String },

    /// `dirs::home_dir()` returned `None`: cannot locate `~/.imagesync/`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> ConfigError {
    ConfigError::Io {
        path: path.into(),
        source,
    }
}
