use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::thread::sleep;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use imagesync_core::{
    Accepted, Capabilities, Credentials, SyncRequest, Task, TaskId, TaskSummary,
};

use crate::error::{io_err, DaemonError};
use crate::paths::socket_path;

/// JSON newline-delimited request. Only the fields `cmd` needs are set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonRequest {
    pub cmd: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<SyncRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_offset: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Credentials>,
}

impl DaemonRequest {
    pub fn command(cmd: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            ..Self::default()
        }
    }
}

/// JSON newline-delimited response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DaemonResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Answer to `config`. Never carries the password.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigView {
    pub capabilities: Capabilities,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    pub docker_bin: String,
    pub skopeo_bin: String,
    pub prefer_fast_copy: bool,
    pub max_tasks: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_timeout_secs: Option<u64>,
}

/// Answer to `cancel`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelOutcome {
    pub task_id: TaskId,
    /// `false` when the task had already finished.
    pub cancelled: bool,
}

/// Send one JSON request to the daemon socket and return one response.
pub fn send_request(home: &Path, request: &DaemonRequest) -> Result<DaemonResponse, DaemonError> {
    let socket = socket_path(home);
    if !socket.exists() {
        return Err(DaemonError::DaemonNotRunning { socket });
    }

    let mut stream = UnixStream::connect(&socket).map_err(|err| {
        if matches!(
            err.kind(),
            std::io::ErrorKind::NotFound
                | std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::ConnectionReset
        ) {
            DaemonError::DaemonNotRunning {
                socket: socket.clone(),
            }
        } else {
            io_err(&socket, err)
        }
    })?;

    let payload = serde_json::to_string(request)?;
    stream
        .write_all(payload.as_bytes())
        .map_err(|e| io_err(&socket, e))?;
    stream.write_all(b"\n").map_err(|e| io_err(&socket, e))?;
    stream.flush().map_err(|e| io_err(&socket, e))?;

    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    let read = reader
        .read_line(&mut line)
        .map_err(|e| io_err(&socket, e))?;
    if read == 0 {
        return Err(DaemonError::Protocol(
            "daemon closed connection before responding".to_string(),
        ));
    }

    let response: DaemonResponse = serde_json::from_str(line.trim_end())?;
    Ok(response)
}

/// `status`, retried briefly so callers can use it right after spawning the daemon.
pub fn request_status(home: &Path) -> Result<Value, DaemonError> {
    let request = DaemonRequest::command("status");

    let mut last_not_running: Option<DaemonError> = None;
    for attempt in 0..5 {
        match send_request(home, &request) {
            Ok(response) => return response_into_data(response),
            Err(err @ DaemonError::DaemonNotRunning { .. }) => {
                last_not_running = Some(err);
                if attempt < 4 {
                    sleep(Duration::from_millis(100));
                    continue;
                }
            }
            Err(err) => return Err(err),
        }
    }

    Err(last_not_running.unwrap_or_else(|| {
        DaemonError::Protocol("daemon status retry loop exited unexpectedly".to_string())
    }))
}

pub fn request_stop(home: &Path) -> Result<(), DaemonError> {
    let response = send_request(home, &DaemonRequest::command("stop"))?;
    response_into_data(response).map(|_| ())
}

pub fn submit_sync(home: &Path, request: SyncRequest) -> Result<Accepted, DaemonError> {
    call(
        home,
        DaemonRequest {
            request: Some(request),
            ..DaemonRequest::command("sync")
        },
    )
}

/// Task snapshot with log entries from `log_offset` on.
pub fn fetch_task(home: &Path, task_id: &TaskId, log_offset: usize) -> Result<Task, DaemonError> {
    call(
        home,
        DaemonRequest {
            task_id: Some(task_id.clone()),
            log_offset: Some(log_offset),
            ..DaemonRequest::command("task")
        },
    )
}

pub fn list_tasks(home: &Path) -> Result<Vec<TaskSummary>, DaemonError> {
    call(home, DaemonRequest::command("tasks"))
}

pub fn cancel_task(home: &Path, task_id: &TaskId) -> Result<CancelOutcome, DaemonError> {
    call(
        home,
        DaemonRequest {
            task_id: Some(task_id.clone()),
            ..DaemonRequest::command("cancel")
        },
    )
}

pub fn configure_credentials(home: &Path, credentials: Credentials) -> Result<(), DaemonError> {
    let response = send_request(
        home,
        &DaemonRequest {
            credentials: Some(credentials),
            ..DaemonRequest::command("configure")
        },
    )?;
    response_into_data(response).map(|_| ())
}

pub fn request_capabilities(home: &Path) -> Result<Capabilities, DaemonError> {
    call(home, DaemonRequest::command("capabilities"))
}

pub fn request_config(home: &Path) -> Result<ConfigView, DaemonError> {
    call(home, DaemonRequest::command("config"))
}

fn call<T: DeserializeOwned>(home: &Path, request: DaemonRequest) -> Result<T, DaemonError> {
    let response = send_request(home, &request)?;
    let data = response_into_data(response)?;
    Ok(serde_json::from_value(data)?)
}

fn response_into_data(response: DaemonResponse) -> Result<Value, DaemonError> {
    if response.ok {
        Ok(response.data.unwrap_or(Value::Null))
    } else {
        Err(DaemonError::Protocol(
            response
                .error
                .unwrap_or_else(|| "unknown daemon error".to_string()),
        ))
    }
}
