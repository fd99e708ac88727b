//! Single `copy --all` invocation, no local staging.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use imagesync_core::{StrategyKind, TaskStatus};

use super::{StrategyContext, SyncStrategy};
use crate::error::PipelineFailure;
use crate::runner::CommandSpec;

const REASON_LINES: usize = 3;

#[derive(Debug, Clone, Copy, Default)]
pub struct FastCopyStrategy;

#[async_trait]
impl SyncStrategy for FastCopyStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::FastCopy
    }

    /// Credentials travel with the copy command; there is no separate login.
    async fn authenticate(&self, ctx: &StrategyContext<'_>) -> Result<(), PipelineFailure> {
        let registry = &ctx.plan.destination.registry;
        match &ctx.plan.credentials {
            Some(creds) => ctx.task.log(format!(
                "using credentials for {registry} as {}",
                creds.username
            )),
            None => ctx.task.log(format!(
                "no credentials configured for {registry}; copying anonymously"
            )),
        }
        Ok(())
    }

    async fn execute(&self, ctx: &StrategyContext<'_>) -> Result<(), PipelineFailure> {
        let source = ctx.plan.source.transport();
        let destination = ctx.plan.destination.transport();

        ctx.task.set_status(TaskStatus::Copying);
        ctx.task.set_step("copying all platforms");
        ctx.task.advance(10);
        ctx.task.log(format!("copying {source} to {destination}"));

        let mut spec = CommandSpec::new(&ctx.tools.skopeo_bin).args(["copy", "--all"]);
        if let Some(creds) = &ctx.plan.credentials {
            spec = spec
                .arg("--dest-creds")
                .secret_arg(format!("{}:{}", creds.username, creds.password));
        }
        let spec = spec.arg(source).arg(destination);

        ctx.task.log(format!("$ {spec}"));
        let task = ctx.task;
        let started = AtomicBool::new(false);
        let output = ctx
            .runner
            .run(&spec, &|line| {
                if !started.swap(true, Ordering::Relaxed) {
                    task.advance(50);
                }
                task.log(line);
            })
            .await
            .map_err(PipelineFailure::from_runner)?;

        if !output.success() {
            return Err(PipelineFailure::Copy {
                detail: output.tail(REASON_LINES),
            });
        }
        ctx.task.advance(99);
        ctx.task.log("copy completed");
        Ok(())
    }
}
