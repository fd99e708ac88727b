#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use imagesync_core::{Credentials, Task, TaskId};
use imagesync_sync::{
    CommandOutput, CommandRunner, CommandSpec, CredentialProvider, Orchestrator,
    OrchestratorConfig, PatternClassifier, SyncError, Toolset,
};

/// What the fake host does for one command.
pub enum Step {
    Exit(i32, Vec<String>),
    NotInstalled,
    Hang,
}

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub program: String,
    pub argv: Vec<String>,
    pub stdin: Option<String>,
    pub display: String,
}

/// Command runner answering from a closure and recording every call.
pub struct ScriptedRunner {
    handler: Box<dyn Fn(&CommandSpec) -> Step + Send + Sync>,
    calls: Mutex<Vec<RecordedCall>>,
    delay: Duration,
}

impl ScriptedRunner {
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls whose argv starts with `prefix`.
    pub fn calls_starting(&self, prefix: &[&str]) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.argv.len() >= prefix.len() && c.argv.iter().zip(prefix).all(|(a, p)| a == p))
            .collect()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(
        &self,
        spec: &CommandSpec,
        on_line: &(dyn for<'l> Fn(&'l str) + Send + Sync),
    ) -> Result<CommandOutput, SyncError> {
        self.calls.lock().unwrap().push(RecordedCall {
            program: spec.program.clone(),
            argv: spec.argv().into_iter().map(String::from).collect(),
            stdin: spec.stdin_input().map(String::from),
            display: spec.to_string(),
        });
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match (self.handler)(spec) {
            Step::Exit(code, lines) => {
                for line in &lines {
                    on_line(line);
                }
                Ok(CommandOutput {
                    exit_code: Some(code),
                    lines,
                })
            }
            Step::NotInstalled => Err(SyncError::Spawn {
                program: spec.program.clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "No such file or directory"),
            }),
            Step::Hang => std::future::pending().await,
        }
    }
}

/// Builder for a fake docker/skopeo host.
#[derive(Default, Clone)]
pub struct FakeHost {
    pub missing_platforms: Vec<String>,
    pub deny_push: bool,
    pub deny_login: bool,
    pub fast_copy: bool,
    pub copy_fails: bool,
    pub docker_missing: bool,
    /// Pulls of sources containing this string fail as not found.
    pub broken_source: Option<String>,
    /// Pulls hang forever.
    pub hang_pull: bool,
    /// Docker commands whose argv starts with this prefix hang forever.
    pub hang_on: Option<&'static [&'static str]>,
    /// Platforms whose pull fails with a network error.
    pub unreachable_platforms: Vec<String>,
    pub manifest_create_fails: bool,
    pub manifest_push_fails: bool,
    pub delay: Duration,
}

impl FakeHost {
    pub fn runner(self) -> Arc<ScriptedRunner> {
        let delay = self.delay;
        let host = self;
        Arc::new(ScriptedRunner {
            handler: Box::new(move |spec| host.answer(spec)),
            calls: Mutex::new(Vec::new()),
            delay,
        })
    }

    fn answer(&self, spec: &CommandSpec) -> Step {
        let argv = spec.argv();
        if spec.program == "skopeo" {
            if !self.fast_copy {
                return Step::NotInstalled;
            }
            return match argv.first().copied() {
                Some("copy") if self.copy_fails => Step::Exit(
                    1,
                    lines(&["Getting image source signatures", "FATA[0001] writing manifest: unauthorized: authentication required"]),
                ),
                Some("copy") => Step::Exit(
                    0,
                    lines(&["Getting image list signatures", "Copying 2 of 2 images in list", "Writing manifest list to image destination"]),
                ),
                _ => ok(),
            };
        }
        if self.docker_missing {
            return Step::NotInstalled;
        }
        if let Some(prefix) = self.hang_on {
            if argv.len() >= prefix.len() && argv.iter().zip(prefix).all(|(a, p)| a == p) {
                return Step::Hang;
            }
        }
        match (argv.first().copied(), argv.get(1).copied()) {
            (Some("manifest"), Some("create")) if self.manifest_create_fails => {
                return Step::Exit(
                    1,
                    lines(&["no such manifest: harbor.x/library/nginx:latest-amd64"]),
                );
            }
            (Some("manifest"), Some("push")) if self.manifest_push_fails => {
                return Step::Exit(
                    1,
                    lines(&["failed to put manifest harbor.x/library/nginx:latest: errors:", "denied: requested access to the resource is denied"]),
                );
            }
            _ => {}
        }
        match argv.first().copied() {
            Some("login") if self.deny_login => Step::Exit(
                1,
                lines(&["Error response from daemon: Get \"https://harbor.x/v2/\": unauthorized: incorrect username or password"]),
            ),
            Some("login") => Step::Exit(0, lines(&["Login Succeeded"])),
            Some("pull") => {
                if self.hang_pull {
                    return Step::Hang;
                }
                let platform = argv.get(2).copied().unwrap_or_default();
                let source = argv.get(3).copied().unwrap_or_default();
                if let Some(broken) = &self.broken_source {
                    if source.contains(broken.as_str()) {
                        return Step::Exit(
                            1,
                            lines(&["Error response from daemon: manifest for this:tag not found: manifest unknown"]),
                        );
                    }
                }
                if self.unreachable_platforms.iter().any(|p| p == platform) {
                    return Step::Exit(
                        1,
                        lines(&["Error response from daemon: Get \"https://registry-1.docker.io/v2/\": dial tcp: i/o timeout"]),
                    );
                }
                if self.missing_platforms.iter().any(|p| p == platform) {
                    return Step::Exit(
                        1,
                        vec![format!("no matching manifest for {platform} in the manifest list entries")],
                    );
                }
                Step::Exit(0, lines(&["Status: Downloaded newer image"]))
            }
            Some("push") if self.deny_push => Step::Exit(
                1,
                lines(&["The push refers to repository [harbor.x/library/nginx]", "unauthorized: authentication required"]),
            ),
            _ => ok(),
        }
    }
}

/// Docker host with one local image store and one destination registry.
///
/// Local tags and pushed images remember which platform they were pulled
/// for, so a tag taken from the wrong pull is visible in the registry.
pub struct StatefulDocker {
    state: Mutex<DockerState>,
    delay: Duration,
}

#[derive(Debug, Default, Clone)]
pub struct DockerState {
    /// Local tag -> platform of the image it points at.
    pub local: HashMap<String, String>,
    /// Pushed reference -> platform of the pushed image.
    pub registry: HashMap<String, String>,
    pub removed: Vec<String>,
}

impl StatefulDocker {
    pub fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(DockerState::default()),
            delay,
        })
    }

    pub fn state(&self) -> DockerState {
        self.state.lock().unwrap().clone()
    }

    fn apply(&self, argv: &[&str]) -> Step {
        let mut state = self.state.lock().unwrap();
        match argv {
            ["pull", "--platform", platform, source] => {
                state.local.insert(source.to_string(), platform.to_string());
                ok()
            }
            ["tag", source, target] => match state.local.get(*source).cloned() {
                Some(platform) => {
                    state.local.insert(target.to_string(), platform);
                    ok()
                }
                None => Step::Exit(1, vec![format!("Error response from daemon: No such image: {source}")]),
            },
            ["push", image] => match state.local.get(*image).cloned() {
                Some(platform) => {
                    state.registry.insert(image.to_string(), platform);
                    ok()
                }
                None => Step::Exit(1, vec![format!("An image does not exist locally with the tag: {image}")]),
            },
            ["rmi", image] => {
                state.local.remove(*image);
                state.removed.push(image.to_string());
                ok()
            }
            _ => ok(),
        }
    }
}

#[async_trait]
impl CommandRunner for StatefulDocker {
    async fn run(
        &self,
        spec: &CommandSpec,
        _on_line: &(dyn for<'l> Fn(&'l str) + Send + Sync),
    ) -> Result<CommandOutput, SyncError> {
        if spec.program != "docker" {
            return Err(SyncError::Spawn {
                program: spec.program.clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "No such file or directory"),
            });
        }
        tokio::time::sleep(self.delay).await;
        match self.apply(&spec.argv()) {
            Step::Exit(code, lines) => Ok(CommandOutput {
                exit_code: Some(code),
                lines,
            }),
            _ => Ok(CommandOutput::default()),
        }
    }
}

pub fn ok() -> Step {
    Step::Exit(0, Vec::new())
}

fn lines(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

pub fn harbor_creds() -> Credentials {
    Credentials {
        registry: "harbor.x".into(),
        username: "admin".into(),
        password: "Harbor12345".into(),
    }
}

pub fn config(timeout: Option<Duration>) -> OrchestratorConfig {
    OrchestratorConfig {
        tools: Toolset::default(),
        prefer_fast_copy: true,
        max_tasks: 100,
        task_timeout: timeout,
    }
}

pub fn orchestrator(runner: Arc<ScriptedRunner>, fallback: Option<Credentials>) -> Orchestrator {
    orchestrator_with(runner, fallback, config(None))
}

pub fn orchestrator_with(
    runner: Arc<dyn CommandRunner>,
    fallback: Option<Credentials>,
    config: OrchestratorConfig,
) -> Orchestrator {
    Orchestrator::with_parts(
        config,
        CredentialProvider::in_memory(fallback),
        runner,
        Arc::new(PatternClassifier::default()),
    )
}

/// Poll until `id` is terminal.
pub async fn wait_terminal(orch: &Orchestrator, id: &TaskId) -> Task {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let task = orch.get(id).expect("task exists");
        if task.status.is_terminal() {
            return task;
        }
        assert!(Instant::now() < deadline, "task {id} did not finish: {task:?}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Poll until `predicate` holds for task `id`.
pub async fn wait_until<F>(orch: &Orchestrator, id: &TaskId, predicate: F) -> Task
where
    F: Fn(&Task) -> bool,
{
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let task = orch.get(id).expect("task exists");
        if predicate(&task) {
            return task;
        }
        assert!(Instant::now() < deadline, "condition not reached: {task:?}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub fn log_text(task: &Task) -> String {
    task.logs
        .iter()
        .map(|e| e.message.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}
