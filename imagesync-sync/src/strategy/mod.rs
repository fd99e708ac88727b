//! Execution strategies.
//!
//! A strategy is chosen once per task by [`select`] and owns every external
//! invocation of that task: login, transfer, manifest. The orchestrator
//! never branches on which tool is in use.

mod docker;
mod fast_copy;

pub use docker::DockerStrategy;
pub use fast_copy::FastCopyStrategy;

use async_trait::async_trait;

use imagesync_core::{Capabilities, StrategyKind, SyncPlan};

use crate::capability::Toolset;
use crate::classify::OutputClassifier;
use crate::error::PipelineFailure;
use crate::leases::SourceLeases;
use crate::runner::{CommandOutput, CommandRunner, CommandSpec};
use crate::tasks::TaskHandle;

/// Everything a strategy may touch while running one task.
pub struct StrategyContext<'a> {
    pub plan: &'a SyncPlan,
    pub task: &'a TaskHandle,
    pub runner: &'a dyn CommandRunner,
    pub classifier: &'a dyn OutputClassifier,
    pub tools: &'a Toolset,
    /// Shared across tasks; see [`SourceLeases`].
    pub sources: &'a SourceLeases,
}

impl StrategyContext<'_> {
    /// Run `spec`, echoing the (masked) command line and every output line
    /// into the task log as they arrive.
    ///
    /// A process that cannot be started is fatal for the task.
    pub(crate) async fn run_logged(&self, spec: CommandSpec) -> Result<CommandOutput, PipelineFailure> {
        self.task.log(format!("$ {spec}"));
        let task = self.task;
        self.runner
            .run(&spec, &|line| task.log(line))
            .await
            .map_err(PipelineFailure::from_runner)
    }

    /// Run `spec` without touching the task log. Failures of any kind are ignored.
    pub(crate) async fn run_quiet(&self, spec: CommandSpec) {
        match self.runner.run(&spec, &|_| {}).await {
            Ok(output) if !output.success() => {
                tracing::debug!(task_id = %self.task.id(), command = %spec, "best-effort command failed");
            }
            Ok(_) => {}
            Err(err) => {
                tracing::debug!(task_id = %self.task.id(), command = %spec, error = %err, "best-effort command not started");
            }
        }
    }
}

#[async_trait]
pub trait SyncStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Establish destination credentials for [`SyncStrategy::execute`].
    async fn authenticate(&self, ctx: &StrategyContext<'_>) -> Result<(), PipelineFailure>;

    /// Transfer the image. `Ok` means the destination reference now exists.
    async fn execute(&self, ctx: &StrategyContext<'_>) -> Result<(), PipelineFailure>;
}

/// Pick the strategy for one task from the host's capabilities.
pub fn select(capabilities: &Capabilities, prefer_fast_copy: bool) -> Box<dyn SyncStrategy> {
    if prefer_fast_copy && capabilities.fast_copy {
        Box::new(FastCopyStrategy)
    } else {
        Box::new(DockerStrategy)
    }
}

/// Progress at the end of step `done` of `total` within `[start, end]`.
pub(crate) fn phase_progress(start: u8, end: u8, done: usize, total: usize) -> u8 {
    if total == 0 {
        return end;
    }
    let span = usize::from(end.saturating_sub(start));
    let offset = span * done.min(total) / total;
    start.saturating_add(u8::try_from(offset).unwrap_or(u8::MAX))
}
