//! # imagesync-sync
//!
//! The sync task orchestrator and everything it drives.
//!
//! [`Orchestrator::submit`] validates a [`SyncRequest`](imagesync_core::SyncRequest),
//! records a `pending` task in the [`TaskRegistry`], and runs the pipeline on
//! the tokio runtime. Observers poll [`Orchestrator::get`] until the task is
//! terminal.
//!
//! - [`runner`]: one external process per call
//! - [`classify`]: failure kind from tool output
//! - [`strategy`]: Docker path and fast-copy path
//! - [`tasks`]: task registry with per-task locking
//! - [`leases`]: per-source locks shared by concurrent Docker-path tasks

pub mod capability;
pub mod classify;
pub mod credentials;
pub mod error;
pub mod leases;
pub mod orchestrator;
pub mod runner;
pub mod strategy;
pub mod tasks;

pub use capability::Toolset;
pub use classify::{FailureKind, OutputClassifier, PatternClassifier};
pub use credentials::CredentialProvider;
pub use error::{PipelineFailure, SyncError};
pub use leases::{SourceLease, SourceLeases};
pub use orchestrator::{Orchestrator, OrchestratorConfig};
pub use runner::{CommandOutput, CommandRunner, CommandSpec, ProcessRunner};
pub use strategy::{DockerStrategy, FastCopyStrategy, SyncStrategy};
pub use tasks::{TaskHandle, TaskRegistry};
