use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;

use imagesync_core::{Settings, TaskStatus};
use imagesync_sync::{CredentialProvider, Orchestrator, OrchestratorConfig};

use crate::error::{io_err, DaemonError};
use crate::paths::{imagesync_root, socket_path};
use crate::protocol::{CancelOutcome, ConfigView, DaemonRequest, DaemonResponse};

/// Shared by every socket client.
#[derive(Clone)]
struct DaemonState {
    home: PathBuf,
    orchestrator: Orchestrator,
    shutdown_tx: broadcast::Sender<()>,
    started_at_unix: u64,
}

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(home: &Path) -> Result<(), DaemonError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf()))
}

/// Load settings and credentials from `home`, then serve until stopped.
pub async fn run(home: PathBuf) -> Result<(), DaemonError> {
    ensure_runtime_dirs(&home)?;
    let settings = Settings::load_at(&home)?;
    let credentials =
        CredentialProvider::persistent_at(home.clone(), settings.default_credentials.clone())?;
    let orchestrator = Orchestrator::new(OrchestratorConfig::from_settings(&settings), credentials);

    tracing::info!(
        docker = %settings.docker_bin,
        skopeo = %settings.skopeo_bin,
        prefer_fast_copy = settings.prefer_fast_copy,
        max_tasks = settings.max_tasks,
        "imagesync daemon starting"
    );
    serve(home, orchestrator).await
}

/// Serve `orchestrator` on the daemon socket until `stop` or ctrl-c.
pub async fn serve(home: PathBuf, orchestrator: Orchestrator) -> Result<(), DaemonError> {
    ensure_runtime_dirs(&home)?;
    let (shutdown_tx, _) = broadcast::channel::<()>(16);
    let state = DaemonState {
        home,
        orchestrator,
        shutdown_tx: shutdown_tx.clone(),
        started_at_unix: unix_seconds_now(),
    };

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let state = state.clone();
        tokio::spawn(async move {
            let result = socket_server_task(state, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            let mut shutdown_rx = shutdown.subscribe();
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("received ctrl-c, shutting down daemon");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(DaemonError::Protocol(format!("ctrl-c handler failed: {err}"))),
                    }
                }
            }
        })
    };

    let (socket_result, signal_result) = tokio::join!(socket_handle, signal_handle);
    handle_join("socket_server", socket_result)?;
    handle_join("signal_handler", signal_result)?;
    tracing::info!("imagesync daemon stopped");
    Ok(())
}

async fn socket_server_task(
    state: DaemonState,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let socket = socket_path(&state.home);
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;
    tracing::info!(socket = %socket.display(), "listening");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let state = state.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(stream, state).await {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

async fn handle_socket_client(stream: UnixStream, state: DaemonState) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("daemon socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let request: DaemonRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                write_response(
                    &mut writer,
                    &DaemonResponse::error(format!("invalid request JSON: {err}")),
                )
                .await?;
                continue;
            }
        };

        let stop = request.cmd == "stop";
        let response = dispatch(&state, request).await;
        write_response(&mut writer, &response).await?;
        if stop {
            break;
        }
    }

    Ok(())
}

async fn dispatch(state: &DaemonState, request: DaemonRequest) -> DaemonResponse {
    let orchestrator = &state.orchestrator;
    match request.cmd.as_str() {
        "status" => DaemonResponse::ok(build_status_payload(state)),
        "stop" => {
            let _ = state.shutdown_tx.send(());
            DaemonResponse::ok(json!({ "stopping": true }))
        }
        "sync" => {
            let Some(sync_request) = request.request else {
                return missing_field("sync", "request");
            };
            match orchestrator.submit(&sync_request) {
                Ok(accepted) => to_response(&accepted),
                Err(err) => {
                    tracing::info!(error = %err, "sync request rejected");
                    DaemonResponse::error(err.to_string())
                }
            }
        }
        "task" => {
            let Some(task_id) = request.task_id else {
                return missing_field("task", "task_id");
            };
            match orchestrator.get_since(&task_id, request.log_offset.unwrap_or(0)) {
                Some(task) => to_response(&task),
                None => DaemonResponse::error(format!("task {task_id} not found")),
            }
        }
        "tasks" => to_response(&orchestrator.list()),
        "cancel" => {
            let Some(task_id) = request.task_id else {
                return missing_field("cancel", "task_id");
            };
            match orchestrator.cancel(&task_id) {
                Ok(cancelled) => to_response(&CancelOutcome { task_id, cancelled }),
                Err(err) => DaemonResponse::error(err.to_string()),
            }
        }
        "configure" => {
            let Some(credentials) = request.credentials else {
                return missing_field("configure", "credentials");
            };
            let summary = json!({
                "registry": credentials.registry,
                "username": credentials.username,
            });
            match orchestrator.configure_credentials(credentials) {
                Ok(()) => DaemonResponse::ok(summary),
                Err(err) => DaemonResponse::error(err.to_string()),
            }
        }
        "capabilities" => to_response(&orchestrator.capabilities().await),
        "config" => {
            let capabilities = orchestrator.capabilities().await;
            let current = orchestrator.current_credentials();
            let config = orchestrator.config();
            to_response(&ConfigView {
                capabilities,
                registry: current.as_ref().map(|c| c.registry.clone()),
                username: current.map(|c| c.username),
                docker_bin: config.tools.docker_bin.clone(),
                skopeo_bin: config.tools.skopeo_bin.clone(),
                prefer_fast_copy: config.prefer_fast_copy,
                max_tasks: config.max_tasks,
                task_timeout_secs: config.task_timeout.map(|t| t.as_secs()),
            })
        }
        other => DaemonResponse::error(format!("unknown command '{other}'")),
    }
}

fn build_status_payload(state: &DaemonState) -> Value {
    let tasks = state.orchestrator.list();
    let running = tasks.iter().filter(|t| !t.status.is_terminal()).count();
    let failed = tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Failed)
        .count();

    json!({
        "running": true,
        "pid": std::process::id(),
        "started_at_unix": state.started_at_unix,
        "tasks_total": tasks.len(),
        "tasks_running": running,
        "tasks_failed": failed,
        "socket": socket_path(&state.home).display().to_string(),
    })
}

fn to_response<T: serde::Serialize>(value: &T) -> DaemonResponse {
    match serde_json::to_value(value) {
        Ok(data) => DaemonResponse::ok(data),
        Err(err) => DaemonResponse::error(format!("failed to encode response: {err}")),
    }
}

fn missing_field(cmd: &str, field: &str) -> DaemonResponse {
    DaemonResponse::error(format!("'{cmd}' requires '{field}'"))
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::Protocol(format!(
                "daemon socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale daemon socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

fn ensure_runtime_dirs(home: &Path) -> Result<(), DaemonError> {
    let root = imagesync_root(home);
    if !root.exists() {
        fs::create_dir_all(&root).map_err(|e| io_err(&root, e))?;
    }
    Ok(())
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
) -> Result<(), DaemonError> {
    let payload = serde_json::to_string(response)?;
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))?;
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

fn unix_seconds_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> Result<(), DaemonError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use imagesync_core::{Credentials, SyncRequest, Task, TaskId};
    use imagesync_sync::{
        CommandOutput, CommandRunner, CommandSpec, PatternClassifier, SyncError, Toolset,
    };
    use tempfile::TempDir;

    /// Every tool exists and every command succeeds; skopeo is absent.
    struct HappyHost;

    #[async_trait]
    impl CommandRunner for HappyHost {
        async fn run(
            &self,
            spec: &CommandSpec,
            _on_line: &(dyn for<'l> Fn(&'l str) + Send + Sync),
        ) -> Result<CommandOutput, SyncError> {
            if spec.program == "skopeo" {
                return Err(SyncError::Spawn {
                    program: spec.program.clone(),
                    source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
                });
            }
            Ok(CommandOutput {
                exit_code: Some(0),
                lines: vec![],
            })
        }
    }

    fn state(home: &Path) -> DaemonState {
        let orchestrator = Orchestrator::with_parts(
            OrchestratorConfig {
                tools: Toolset::default(),
                prefer_fast_copy: true,
                max_tasks: 10,
                task_timeout: None,
            },
            CredentialProvider::persistent_at(home.to_path_buf(), None).expect("credentials"),
            Arc::new(HappyHost),
            Arc::new(PatternClassifier::default()),
        );
        let (shutdown_tx, _) = broadcast::channel(4);
        DaemonState {
            home: home.to_path_buf(),
            orchestrator,
            shutdown_tx,
            started_at_unix: 1_000_000,
        }
    }

    fn sync_request() -> DaemonRequest {
        DaemonRequest {
            request: Some(SyncRequest::new("nginx:1.25", "harbor.x")),
            ..DaemonRequest::command("sync")
        }
    }

    async fn wait_for_terminal(state: &DaemonState, id: &TaskId) -> Task {
        for _ in 0..500 {
            let response = dispatch(
                state,
                DaemonRequest {
                    task_id: Some(id.clone()),
                    ..DaemonRequest::command("task")
                },
            )
            .await;
            let task: Task = serde_json::from_value(response.data.expect("data")).expect("task");
            if task.status.is_terminal() {
                return task;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("task {id} did not finish");
    }

    #[tokio::test]
    async fn sync_then_task_reports_success() {
        let home = TempDir::new().expect("home");
        let state = state(home.path());

        let response = dispatch(&state, sync_request()).await;
        assert!(response.ok, "{:?}", response.error);
        let data = response.data.expect("data");
        assert_eq!(data["status"], json!("pending"));
        assert_eq!(data["destination"], json!("harbor.x/library/nginx:1.25"));

        let id: TaskId = serde_json::from_value(data["task_id"].clone()).expect("id");
        let task = wait_for_terminal(&state, &id).await;
        assert_eq!(task.status, TaskStatus::Success);
        assert_eq!(task.progress, 100);
    }

    #[tokio::test]
    async fn task_with_log_offset_returns_only_new_entries() {
        let home = TempDir::new().expect("home");
        let state = state(home.path());
        let data = dispatch(&state, sync_request()).await.data.expect("data");
        let id: TaskId = serde_json::from_value(data["task_id"].clone()).expect("id");
        let full = wait_for_terminal(&state, &id).await;

        let response = dispatch(
            &state,
            DaemonRequest {
                task_id: Some(id),
                log_offset: Some(full.log_total - 1),
                ..DaemonRequest::command("task")
            },
        )
        .await;
        let tail: Task = serde_json::from_value(response.data.expect("data")).expect("task");
        assert_eq!(tail.logs.len(), 1);
        assert_eq!(tail.log_total, full.log_total);
    }

    #[tokio::test]
    async fn invalid_sync_request_is_rejected_without_task() {
        let home = TempDir::new().expect("home");
        let state = state(home.path());
        let mut request = SyncRequest::new("nginx", "harbor.x");
        request.platforms.clear();

        let response = dispatch(
            &state,
            DaemonRequest {
                request: Some(request),
                ..DaemonRequest::command("sync")
            },
        )
        .await;
        assert!(!response.ok);
        assert!(response.error.unwrap_or_default().contains("platform"));

        let listed = dispatch(&state, DaemonRequest::command("tasks")).await;
        assert_eq!(listed.data, Some(json!([])));
    }

    #[tokio::test]
    async fn missing_fields_and_unknown_commands_are_errors() {
        let home = TempDir::new().expect("home");
        let state = state(home.path());

        let response = dispatch(&state, DaemonRequest::command("task")).await;
        assert_eq!(response.error.as_deref(), Some("'task' requires 'task_id'"));

        let response = dispatch(&state, DaemonRequest::command("reticulate")).await;
        assert_eq!(response.error.as_deref(), Some("unknown command 'reticulate'"));

        let response = dispatch(
            &state,
            DaemonRequest {
                task_id: Some("ffffffffffff".into()),
                ..DaemonRequest::command("task")
            },
        )
        .await;
        assert_eq!(response.error.as_deref(), Some("task ffffffffffff not found"));
    }

    #[tokio::test]
    async fn configure_persists_and_config_hides_password() {
        let home = TempDir::new().expect("home");
        let state = state(home.path());

        let response = dispatch(
            &state,
            DaemonRequest {
                credentials: Some(Credentials {
                    registry: "harbor.x".into(),
                    username: "admin".into(),
                    password: "Harbor12345".into(),
                }),
                ..DaemonRequest::command("configure")
            },
        )
        .await;
        assert!(response.ok);
        assert!(imagesync_core::credential_store::load_at(home.path())
            .expect("load")
            .is_some());

        let config = dispatch(&state, DaemonRequest::command("config")).await;
        let data = config.data.expect("data");
        assert_eq!(data["registry"], json!("harbor.x"));
        assert_eq!(data["username"], json!("admin"));
        assert_eq!(data["capabilities"]["fast_copy"], json!(false));
        assert!(!data.to_string().contains("Harbor12345"));
    }

    #[tokio::test]
    async fn status_counts_tasks() {
        let home = TempDir::new().expect("home");
        let state = state(home.path());
        let payload = build_status_payload(&state);
        assert_eq!(payload["running"], json!(true));
        assert_eq!(payload["started_at_unix"], json!(1_000_000u64));
        assert_eq!(payload["tasks_total"], json!(0));
    }

    #[tokio::test]
    async fn stop_broadcasts_shutdown() {
        let home = TempDir::new().expect("home");
        let state = state(home.path());
        let mut shutdown_rx = state.shutdown_tx.subscribe();

        let response = dispatch(&state, DaemonRequest::command("stop")).await;
        assert_eq!(response.data, Some(json!({ "stopping": true })));
        shutdown_rx.recv().await.expect("shutdown signal");
    }
}
