//! Domain types shared by the orchestrator, daemon, and CLI.
//!
//! Every type here is serializable so the daemon can hand snapshots to
//! polling clients without a second representation.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::reference::Platform;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Opaque identifier of a sync task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    /// Fresh random identifier. Uniqueness within a registry is enforced by the registry.
    pub fn generate() -> Self {
        let simple = uuid::Uuid::new_v4().simple().to_string();
        Self(simple[..12].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// Destination registry login. `Debug` never prints the password.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub registry: String,
    pub username: String,
    pub password: String,
}

impl Credentials {
    /// True when these credentials are meant for `registry`.
    pub fn applies_to(&self, registry: &str) -> bool {
        self.registry.trim_end_matches('/') == registry.trim_end_matches('/')
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("registry", &self.registry)
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Lifecycle status of a task.
///
/// Transitions only move forward: `pending → pulling|copying → pushing → success|failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Pending,
    Pulling,
    Copying,
    Pushing,
    Success,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Success | TaskStatus::Failed)
    }

    /// Position in the forward-only ordering. `pulling` and `copying` share a rank.
    pub fn rank(self) -> u8 {
        match self {
            TaskStatus::Pending => 0,
            TaskStatus::Pulling | TaskStatus::Copying => 1,
            TaskStatus::Pushing => 2,
            TaskStatus::Success | TaskStatus::Failed => 3,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Pulling => "pulling",
            TaskStatus::Copying => "copying",
            TaskStatus::Pushing => "pushing",
            TaskStatus::Success => "success",
            TaskStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Which execution strategy a task was assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Pull, tag, and push each platform, then push a manifest list.
    Docker,
    /// One `copy --all` invocation through the fast-copy tool.
    FastCopy,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyKind::Docker => write!(f, "docker"),
            StrategyKind::FastCopy => write!(f, "fast-copy"),
        }
    }
}

/// Per-platform result of the Docker path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PlatformOutcome {
    /// The source has no variant for this platform. Not an error.
    SkippedMissing { detail: String },
    /// Pulled, tagged, and pushed as `image`.
    Pushed { image: String },
    /// Pull, tag, or push failed.
    Failed { stage: String, reason: String },
}

impl PlatformOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            PlatformOutcome::SkippedMissing { .. } => "skipped-missing",
            PlatformOutcome::Pushed { .. } => "pushed",
            PlatformOutcome::Failed { .. } => "failed",
        }
    }
}

// ---------------------------------------------------------------------------
// Task records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformResult {
    pub platform: Platform,
    #[serde(flatten)]
    pub outcome: PlatformOutcome,
}

/// One timestamped line of a task's narrative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub at: DateTime<Utc>,
    pub message: String,
}

/// Full snapshot of one sync task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub source: String,
    /// Fully composed destination reference.
    pub destination: String,
    pub platforms: Vec<Platform>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<StrategyKind>,
    pub status: TaskStatus,
    pub current_step: String,
    /// 0–100, non-decreasing; 100 only on success.
    pub progress: u8,
    /// Entries in pipeline order. May be a suffix when fetched with a log offset.
    pub logs: Vec<LogEntry>,
    /// Total number of log entries the task holds.
    pub log_total: usize,
    #[serde(default)]
    pub platform_results: Vec<PlatformResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(id: TaskId, source: String, destination: String, platforms: Vec<Platform>) -> Self {
        let now = Utc::now();
        Self {
            id,
            source,
            destination,
            platforms,
            strategy: None,
            status: TaskStatus::Pending,
            current_step: String::new(),
            progress: 0,
            logs: Vec::new(),
            log_total: 0,
            platform_results: Vec::new(),
            error: None,
            created_at: now,
            updated_at: now,
            finished_at: None,
        }
    }

    pub fn outcome_for(&self, platform: &Platform) -> Option<&PlatformOutcome> {
        self.platform_results
            .iter()
            .find(|r| &r.platform == platform)
            .map(|r| &r.outcome)
    }

    pub fn summary(&self) -> TaskSummary {
        TaskSummary {
            id: self.id.clone(),
            source: self.source.clone(),
            destination: self.destination.clone(),
            status: self.status,
            progress: self.progress,
            strategy: self.strategy,
            created_at: self.created_at,
        }
    }
}

/// Row returned by task listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSummary {
    pub id: TaskId,
    pub source: String,
    pub destination: String,
    pub status: TaskStatus,
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<StrategyKind>,
    pub created_at: DateTime<Utc>,
}

/// Returned to the caller when a task is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Accepted {
    pub task_id: TaskId,
    pub destination: String,
    pub status: TaskStatus,
}

/// Which external tools are usable on this host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Capabilities {
    pub docker: bool,
    pub buildx: bool,
    pub fast_copy: bool,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
