//! Per-platform pull → tag → push, then one manifest list.
//!
//! Progress bands: pulls 0–50, pushes 50–90, manifest 90–99. The task only
//! reaches 100 when the orchestrator marks it successful.

use async_trait::async_trait;

use imagesync_core::{Platform, PlatformOutcome, StrategyKind, TaskStatus};

use super::{phase_progress, StrategyContext, SyncStrategy};
use crate::classify::FailureKind;
use crate::error::PipelineFailure;
use crate::leases::SourceLease;
use crate::runner::{CommandOutput, CommandSpec};

/// Output lines quoted in a failure reason.
const REASON_LINES: usize = 2;

#[derive(Debug, Clone, Copy, Default)]
pub struct DockerStrategy;

/// A platform image present locally under its destination tag.
struct Staged {
    platform: Platform,
    image: String,
}

#[async_trait]
impl SyncStrategy for DockerStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Docker
    }

    async fn authenticate(&self, ctx: &StrategyContext<'_>) -> Result<(), PipelineFailure> {
        let registry = &ctx.plan.destination.registry;
        let Some(creds) = &ctx.plan.credentials else {
            ctx.task.log(format!(
                "no credentials configured for {registry}; pushing with the existing docker login"
            ));
            return Ok(());
        };

        ctx.task.set_step(format!("logging in to {registry}"));
        ctx.task.log(format!("logging in to {registry} as {}", creds.username));
        let output = ctx
            .run_logged(
                CommandSpec::new(&ctx.tools.docker_bin)
                    .args(["login", "-u", creds.username.as_str(), "--password-stdin"])
                    .arg(registry.as_str())
                    .stdin(creds.password.clone()),
            )
            .await?;
        if !output.success() {
            return Err(PipelineFailure::Login {
                registry: registry.clone(),
                detail: output.tail(REASON_LINES),
            });
        }
        ctx.task.log(format!("logged in to {registry}"));
        Ok(())
    }

    async fn execute(&self, ctx: &StrategyContext<'_>) -> Result<(), PipelineFailure> {
        let lease = ctx.sources.acquire(&ctx.plan.source.to_string());
        let mut staged = Vec::new();
        let result = transfer(ctx, &lease, &mut staged).await;
        cleanup(ctx, &lease, &staged).await;
        result
    }
}

async fn transfer(
    ctx: &StrategyContext<'_>,
    lease: &SourceLease,
    staged: &mut Vec<Staged>,
) -> Result<(), PipelineFailure> {
    let mut reasons = Vec::new();
    pull_all(ctx, lease, staged, &mut reasons).await?;
    if staged.is_empty() {
        return Err(PipelineFailure::NothingPushed { reasons });
    }
    let pushed = push_all(ctx, staged, &mut reasons).await?;
    if pushed.is_empty() {
        return Err(PipelineFailure::NothingPushed { reasons });
    }
    publish_manifest(ctx, &pushed).await
}

async fn pull_all(
    ctx: &StrategyContext<'_>,
    lease: &SourceLease,
    staged: &mut Vec<Staged>,
    reasons: &mut Vec<String>,
) -> Result<(), PipelineFailure> {
    let source = ctx.plan.source.to_string();
    let platforms = &ctx.plan.platforms;
    ctx.task.set_status(TaskStatus::Pulling);

    for (i, platform) in platforms.iter().enumerate() {
        ctx.task
            .set_step(format!("pulling {platform} ({}/{})", i + 1, platforms.len()));
        // The local source tag is shared with other tasks until it is re-tagged.
        let guard = lease.lock().await;
        ctx.task.log(format!("pulling {source} for {platform}"));
        let pull = ctx
            .run_logged(
                CommandSpec::new(&ctx.tools.docker_bin)
                    .args(["pull", "--platform"])
                    .arg(platform.to_string())
                    .arg(source.as_str()),
            )
            .await?;

        if pull.success() {
            let image = ctx.plan.destination.platform_image(platform);
            let tag = ctx
                .run_logged(
                    CommandSpec::new(&ctx.tools.docker_bin)
                        .args(["tag", source.as_str(), image.as_str()]),
                )
                .await?;
            drop(guard);
            if tag.success() {
                ctx.task.log(format!("tagged {platform} as {image}"));
                staged.push(Staged {
                    platform: platform.clone(),
                    image,
                });
            } else {
                record_failure(ctx, platform, "tag", &tag, reasons);
            }
        } else {
            drop(guard);
            match ctx.classifier.classify(&pull) {
                FailureKind::MissingPlatform => {
                    let detail = pull.tail(REASON_LINES);
                    ctx.task.log(format!(
                        "{source} does not provide {platform}; skipping this platform"
                    ));
                    reasons.push(format!("{platform}: not provided by source"));
                    ctx.task
                        .record_platform(platform, PlatformOutcome::SkippedMissing { detail });
                }
                _ => record_failure(ctx, platform, "pull", &pull, reasons),
            }
        }
        ctx.task.advance(phase_progress(0, 50, i + 1, platforms.len()));
    }
    Ok(())
}

async fn push_all(
    ctx: &StrategyContext<'_>,
    staged: &[Staged],
    reasons: &mut Vec<String>,
) -> Result<Vec<String>, PipelineFailure> {
    ctx.task.set_status(TaskStatus::Pushing);
    let mut pushed = Vec::new();

    for (i, item) in staged.iter().enumerate() {
        ctx.task.set_step(format!(
            "pushing {} ({}/{})",
            item.platform,
            i + 1,
            staged.len()
        ));
        let push = ctx
            .run_logged(
                CommandSpec::new(&ctx.tools.docker_bin).args(["push", item.image.as_str()]),
            )
            .await?;
        if push.success() {
            ctx.task.log(format!("pushed {}", item.image));
            ctx.task.record_platform(
                &item.platform,
                PlatformOutcome::Pushed {
                    image: item.image.clone(),
                },
            );
            pushed.push(item.image.clone());
        } else {
            record_failure(ctx, &item.platform, "push", &push, reasons);
        }
        ctx.task.advance(phase_progress(50, 90, i + 1, staged.len()));
    }
    Ok(pushed)
}

async fn publish_manifest(ctx: &StrategyContext<'_>, images: &[String]) -> Result<(), PipelineFailure> {
    let destination = ctx.plan.destination.to_string();
    let docker = ctx.tools.docker_bin.as_str();

    ctx.task.set_step("creating manifest list");
    ctx.task.advance(90);
    ctx.run_quiet(CommandSpec::new(docker).args(["manifest", "rm", destination.as_str()]))
        .await;

    let create = ctx
        .run_logged(
            CommandSpec::new(docker)
                .args(["manifest", "create", destination.as_str()])
                .args(images.iter().map(String::as_str)),
        )
        .await?;
    if !create.success() {
        return Err(PipelineFailure::ManifestCreate {
            detail: create.tail(REASON_LINES),
        });
    }
    ctx.task.advance(95);

    ctx.task.set_step("pushing manifest list");
    let push = ctx
        .run_logged(CommandSpec::new(docker).args([
            "manifest",
            "push",
            "--purge",
            destination.as_str(),
        ]))
        .await?;
    if !push.success() {
        let kind = ctx.classifier.classify(&push);
        return Err(PipelineFailure::ManifestPush {
            detail: format!("{}: {}", kind.describe(), push.tail(REASON_LINES)),
        });
    }
    ctx.task.log(format!(
        "manifest list {destination} pushed with {} platform image(s)",
        images.len()
    ));
    ctx.task.advance(99);
    Ok(())
}

/// Remove local images this task created. Never affects the outcome.
///
/// The source image is left in place while another task still holds it.
async fn cleanup(ctx: &StrategyContext<'_>, lease: &SourceLease, staged: &[Staged]) {
    if staged.is_empty() {
        return;
    }
    ctx.task.set_step("removing local images");
    let docker = ctx.tools.docker_bin.as_str();
    for item in staged {
        ctx.run_quiet(CommandSpec::new(docker).args(["rmi", item.image.as_str()]))
            .await;
    }
    let source = ctx.plan.source.to_string();
    let _guard = lease.lock().await;
    if lease.is_sole_holder() {
        ctx.run_quiet(CommandSpec::new(docker).args(["rmi", source.as_str()]))
            .await;
    } else {
        tracing::debug!(task_id = %ctx.task.id(), %source, "source image still in use; kept");
    }
    ctx.task.log("local images removed");
}

fn record_failure(
    ctx: &StrategyContext<'_>,
    platform: &Platform,
    stage: &str,
    output: &CommandOutput,
    reasons: &mut Vec<String>,
) {
    let kind = ctx.classifier.classify(output);
    let reason = output.tail(REASON_LINES);
    if kind == FailureKind::Authentication {
        ctx.task
            .log(format!("authentication failed during {stage} of {platform}: {reason}"));
    } else {
        ctx.task.log(format!(
            "{stage} failed for {platform} ({}): {reason}",
            kind.describe()
        ));
    }
    reasons.push(format!("{platform}: {stage} failed ({})", kind.describe()));
    ctx.task.record_platform(
        platform,
        PlatformOutcome::Failed {
            stage: stage.to_string(),
            reason,
        },
    );
}
