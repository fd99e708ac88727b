//! Sync orchestrator: validates requests, owns the task registry, and runs
//! one pipeline per task off the caller's path.
//!
//! Each accepted task gets two tokio tasks: the pipeline itself, and a
//! supervisor that awaits it. The supervisor turns cancellation, timeout and
//! panics into a `failed` terminal state, so no task stays visibly running
//! after its pipeline has stopped.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use tokio::task::{AbortHandle, JoinError, JoinHandle};
use tracing::Instrument;

use imagesync_core::{
    Accepted, Capabilities, Credentials, RequestError, Settings, SyncPlan, SyncRequest, Task,
    TaskId, TaskStatus, TaskSummary,
};

use crate::capability::{self, Toolset};
use crate::classify::{OutputClassifier, PatternClassifier};
use crate::credentials::CredentialProvider;
use crate::error::{PipelineFailure, SyncError};
use crate::leases::SourceLeases;
use crate::runner::{CommandRunner, ProcessRunner};
use crate::strategy::{self, StrategyContext};
use crate::tasks::{TaskHandle, TaskRegistry};

/// Tunables taken from [`Settings`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    pub tools: Toolset,
    pub prefer_fast_copy: bool,
    pub max_tasks: usize,
    pub task_timeout: Option<Duration>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

impl OrchestratorConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            tools: Toolset {
                docker_bin: settings.docker_bin.clone(),
                skopeo_bin: settings.skopeo_bin.clone(),
            },
            prefer_fast_copy: settings.prefer_fast_copy,
            max_tasks: settings.max_tasks,
            task_timeout: settings.task_timeout(),
        }
    }
}

/// Cheap to clone; clones share one registry.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    registry: TaskRegistry,
    runner: Arc<dyn CommandRunner>,
    classifier: Arc<dyn OutputClassifier>,
    credentials: CredentialProvider,
    config: OrchestratorConfig,
    capabilities: RwLock<Option<Capabilities>>,
    running: Mutex<HashMap<TaskId, AbortHandle>>,
    sources: SourceLeases,
}

impl Orchestrator {
    /// Orchestrator running real processes with the default classifier.
    pub fn new(config: OrchestratorConfig, credentials: CredentialProvider) -> Self {
        Self::with_parts(
            config,
            credentials,
            Arc::new(ProcessRunner),
            Arc::new(PatternClassifier::default()),
        )
    }

    pub fn with_parts(
        config: OrchestratorConfig,
        credentials: CredentialProvider,
        runner: Arc<dyn CommandRunner>,
        classifier: Arc<dyn OutputClassifier>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry: TaskRegistry::new(config.max_tasks),
                runner,
                classifier,
                credentials,
                config,
                capabilities: RwLock::new(None),
                running: Mutex::new(HashMap::new()),
                sources: SourceLeases::new(),
            }),
        }
    }

    /// Validate `request`, create a `pending` task, and start its pipeline.
    ///
    /// Returns as soon as the task exists. Must be called from within a
    /// tokio runtime. Invalid requests create nothing.
    pub fn submit(&self, request: &SyncRequest) -> Result<Accepted, RequestError> {
        let mut plan = request.validate()?;
        plan.credentials = self
            .inner
            .credentials
            .resolve(&plan.destination.registry, plan.credentials.take());

        let handle = self.inner.registry.create(
            plan.source.to_string(),
            plan.destination.to_string(),
            plan.platforms.clone(),
        );
        let accepted = Accepted {
            task_id: handle.id().clone(),
            destination: plan.destination.to_string(),
            status: TaskStatus::Pending,
        };
        tracing::info!(
            task_id = %accepted.task_id,
            source = %plan.source,
            destination = %plan.destination,
            "sync task accepted"
        );

        self.launch(plan, handle);
        Ok(accepted)
    }

    pub fn get(&self, id: &TaskId) -> Option<Task> {
        self.inner.registry.get(id)
    }

    /// Snapshot carrying only log entries from `log_offset` on.
    pub fn get_since(&self, id: &TaskId, log_offset: usize) -> Option<Task> {
        self.inner.registry.get_since(id, log_offset)
    }

    pub fn list(&self) -> Vec<TaskSummary> {
        self.inner.registry.list()
    }

    /// Stop a running task. Returns `false` when it had already finished.
    pub fn cancel(&self, id: &TaskId) -> Result<bool, SyncError> {
        match self.inner.registry.handle(id) {
            None => return Err(SyncError::TaskNotFound(id.clone())),
            Some(handle) if handle.is_terminal() => return Ok(false),
            Some(_) => {}
        }
        let abort = self
            .inner
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned();
        match abort {
            Some(abort) => {
                tracing::info!(task_id = %id, "cancelling task");
                abort.abort();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Probe the host now and refresh the cached result used for strategy selection.
    pub async fn capabilities(&self) -> Capabilities {
        self.inner.probe().await
    }

    /// Default credentials for future tasks. Running tasks are unaffected.
    pub fn configure_credentials(&self, credentials: Credentials) -> Result<(), SyncError> {
        self.inner.credentials.configure(credentials)
    }

    pub fn current_credentials(&self) -> Option<Credentials> {
        self.inner.credentials.current()
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    fn launch(&self, plan: SyncPlan, handle: TaskHandle) {
        let id = handle.id().clone();
        let span = tracing::info_span!("task", task_id = %id);

        let pipeline: JoinHandle<()> = tokio::spawn({
            let inner = self.inner.clone();
            let handle = handle.clone();
            async move { inner.run_pipeline(&plan, &handle).await }.instrument(span.clone())
        });
        self.inner
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), pipeline.abort_handle());

        let inner = self.inner.clone();
        tokio::spawn(
            async move {
                let stopped = supervise(pipeline, inner.config.task_timeout).await;
                if let Some(failure) = stopped {
                    finalize(&handle, Err(failure));
                }
                inner
                    .running
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&id);
            }
            .instrument(span),
        );
    }
}

impl Inner {
    async fn probe(&self) -> Capabilities {
        let found = capability::probe(self.runner.as_ref(), &self.config.tools).await;
        *self
            .capabilities
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(found);
        found
    }

    async fn cached_capabilities(&self) -> Capabilities {
        let cached = *self
            .capabilities
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        match cached {
            Some(found) => found,
            None => self.probe().await,
        }
    }

    async fn run_pipeline(&self, plan: &SyncPlan, task: &TaskHandle) {
        task.log(format!("source: {}", plan.source));
        task.log(format!("destination: {}", plan.destination));
        let platforms: Vec<String> = plan.platforms.iter().map(ToString::to_string).collect();
        task.log(format!("platforms: {}", platforms.join(", ")));

        task.set_step("checking available tools");
        let capabilities = self.cached_capabilities().await;
        let strategy = strategy::select(&capabilities, self.config.prefer_fast_copy);
        task.set_strategy(strategy.kind());
        task.log(format!("strategy: {}", strategy.kind()));

        let ctx = StrategyContext {
            plan,
            task,
            runner: self.runner.as_ref(),
            classifier: self.classifier.as_ref(),
            tools: &self.config.tools,
            sources: &self.sources,
        };
        let result = match strategy.authenticate(&ctx).await {
            Ok(()) => strategy.execute(&ctx).await,
            Err(failure) => Err(failure),
        };
        finalize(task, result);
    }
}

/// Await the pipeline. `Some` when it stopped without finalizing itself.
async fn supervise(mut pipeline: JoinHandle<()>, limit: Option<Duration>) -> Option<PipelineFailure> {
    let joined = match limit {
        Some(limit) => match tokio::time::timeout(limit, &mut pipeline).await {
            Ok(joined) => joined,
            Err(_) => {
                pipeline.abort();
                // Wait for the abort so the child process is gone before the task is marked.
                let _ = pipeline.await;
                return Some(PipelineFailure::TimedOut { after: limit });
            }
        },
        None => pipeline.await,
    };
    match joined {
        Ok(()) => None,
        Err(err) if err.is_cancelled() => Some(PipelineFailure::Cancelled),
        Err(err) => Some(PipelineFailure::Aborted {
            detail: panic_detail(err),
        }),
    }
}

fn finalize(task: &TaskHandle, result: Result<(), PipelineFailure>) {
    match result {
        Ok(()) => {
            let destination = task.snapshot().destination;
            if task.finish_success("completed") {
                task.log(format!("sync completed: {destination}"));
                tracing::info!(task_id = %task.id(), %destination, "sync task succeeded");
            }
        }
        Err(failure) => {
            let reason = failure.to_string();
            if task.finish_failed(reason.clone()) {
                task.log(format!("sync failed: {reason}"));
                tracing::warn!(task_id = %task.id(), %reason, "sync task failed");
            }
        }
    }
}

fn panic_detail(err: JoinError) -> String {
    match err.try_into_panic() {
        Ok(payload) => payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "pipeline panicked".to_string()),
        Err(err) => err.to_string(),
    }
}
