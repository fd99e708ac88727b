//! Error types for imagesync-sync.

use std::time::Duration;

use imagesync_core::{ConfigError, TaskId};
use thiserror::Error;

/// Errors surfaced to callers of the orchestrator and command runner.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The external program could not be started at all (binary missing,
    /// not executable). Distinct from a non-zero exit.
    #[error("failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Reading output or waiting on a started process failed.
    #[error("I/O error while running '{program}': {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("task {0} not found")]
    TaskNotFound(TaskId),

    #[error("credential store error: {0}")]
    Config(#[from] ConfigError),
}

/// A failure that ends a task as `failed`. Rendered into the summary log line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineFailure {
    #[error("login to {registry} failed: {detail}")]
    Login { registry: String, detail: String },

    #[error("no platform was pushed: {}", .reasons.join("; "))]
    NothingPushed { reasons: Vec<String> },

    #[error("manifest list creation failed: {detail}")]
    ManifestCreate { detail: String },

    #[error("manifest list push failed: {detail}")]
    ManifestPush { detail: String },

    #[error("copy failed: {detail}")]
    Copy { detail: String },

    #[error("tool '{program}' could not be started: {detail}")]
    ToolUnavailable { program: String, detail: String },

    #[error("cancelled")]
    Cancelled,

    #[error("timed out after {after:?}")]
    TimedOut { after: Duration },

    #[error("pipeline aborted: {detail}")]
    Aborted { detail: String },
}

impl PipelineFailure {
    /// Map a runner error onto the fatal outcome for the step that hit it.
    pub(crate) fn from_runner(err: SyncError) -> Self {
        match err {
            SyncError::Spawn { program, source } => PipelineFailure::ToolUnavailable {
                program,
                detail: source.to_string(),
            },
            other => PipelineFailure::Aborted {
                detail: other.to_string(),
            },
        }
    }
}
