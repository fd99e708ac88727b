//! Host capability probe.
//!
//! A tool counts as present when its version command starts and exits 0.
//! Probing never fails: a binary that cannot be spawned is simply absent.

use imagesync_core::Capabilities;

use crate::runner::{CommandRunner, CommandSpec};

/// External tool locations the probe and the strategies share.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toolset {
    pub docker_bin: String,
    pub skopeo_bin: String,
}

impl Default for Toolset {
    fn default() -> Self {
        Self {
            docker_bin: "docker".to_string(),
            skopeo_bin: "skopeo".to_string(),
        }
    }
}

pub async fn probe(runner: &dyn CommandRunner, tools: &Toolset) -> Capabilities {
    let docker = responds(runner, CommandSpec::new(&tools.docker_bin).arg("--version")).await;
    let buildx = docker
        && responds(
            runner,
            CommandSpec::new(&tools.docker_bin).args(["buildx", "version"]),
        )
        .await;
    let fast_copy = responds(runner, CommandSpec::new(&tools.skopeo_bin).arg("--version")).await;

    tracing::debug!(docker, buildx, fast_copy, "capability probe");
    Capabilities {
        docker,
        buildx,
        fast_copy,
    }
}

async fn responds(runner: &dyn CommandRunner, spec: CommandSpec) -> bool {
    match runner.run(&spec, &|_| {}).await {
        Ok(output) => output.success(),
        Err(err) => {
            tracing::debug!(command = %spec, error = %err, "tool unavailable");
            false
        }
    }
}
