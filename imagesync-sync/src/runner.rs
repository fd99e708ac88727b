//! Command runner: one external CLI invocation per call.
//!
//! A non-zero exit is a normal [`CommandOutput`]; only a process that cannot
//! be started (or whose pipes fail) is an error.

use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;

use crate::error::SyncError;

// ---------------------------------------------------------------------------
// Command description
// ---------------------------------------------------------------------------

#[derive(Clone, PartialEq, Eq)]
struct CommandArg {
    value: String,
    secret: bool,
}

/// One invocation: program, ordered arguments, optional stdin and working dir.
#[derive(Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    args: Vec<CommandArg>,
    stdin: Option<String>,
    working_dir: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: None,
            working_dir: None,
        }
    }

    pub fn arg(mut self, value: impl Into<String>) -> Self {
        self.args.push(CommandArg {
            value: value.into(),
            secret: false,
        });
        self
    }

    pub fn args<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for value in values {
            self = self.arg(value);
        }
        self
    }

    /// Argument masked as `***` whenever the command is displayed.
    pub fn secret_arg(mut self, value: impl Into<String>) -> Self {
        self.args.push(CommandArg {
            value: value.into(),
            secret: true,
        });
        self
    }

    /// Bytes written to the child's stdin, then stdin is closed. Never displayed.
    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Argument values as passed to the process.
    pub fn argv(&self) -> Vec<&str> {
        self.args.iter().map(|a| a.value.as_str()).collect()
    }

    pub fn stdin_input(&self) -> Option<&str> {
        self.stdin.as_deref()
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            if arg.secret {
                f.write_str(" ***")?;
            } else {
                write!(f, " {}", arg.value)?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CommandSpec({self})")
    }
}

/// Exit status and combined stdout/stderr, one entry per non-blank line.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub lines: Vec<String>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Last few output lines joined, for one-line failure reasons.
    pub fn tail(&self, max_lines: usize) -> String {
        let start = self.lines.len().saturating_sub(max_lines);
        let tail = self.lines[start..].join(" | ");
        if tail.is_empty() {
            match self.exit_code {
                Some(code) => format!("exit code {code}"),
                None => "terminated by signal".to_string(),
            }
        } else {
            tail
        }
    }
}

// ---------------------------------------------------------------------------
// Runner seam
// ---------------------------------------------------------------------------

/// Executes one external process to completion.
///
/// `on_line` observes each output line as it is produced so callers can
/// publish logs while the process is still running.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(
        &self,
        spec: &CommandSpec,
        on_line: &(dyn for<'l> Fn(&'l str) + Send + Sync),
    ) -> Result<CommandOutput, SyncError>;
}

/// Runs real processes through `tokio::process`.
///
/// Children are killed when the running future is dropped, so aborting a
/// pipeline also stops its in-flight tool.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(
        &self,
        spec: &CommandSpec,
        on_line: &(dyn for<'l> Fn(&'l str) + Send + Sync),
    ) -> Result<CommandOutput, SyncError> {
        let io_err = |source: std::io::Error| SyncError::Io {
            program: spec.program.clone(),
            source,
        };

        let mut command = Command::new(&spec.program);
        command
            .args(spec.argv())
            .stdin(if spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|source| SyncError::Spawn {
            program: spec.program.clone(),
            source,
        })?;
        tracing::debug!(command = %spec, pid = ?child.id(), "spawned");

        if let (Some(input), Some(mut stdin)) = (spec.stdin.as_deref(), child.stdin.take()) {
            match stdin.write_all(input.as_bytes()).await {
                Ok(()) => {}
                // The child may exit before reading its input; its output says why.
                Err(err) if err.kind() == std::io::ErrorKind::BrokenPipe => {}
                Err(err) => return Err(io_err(err)),
            }
            drop(stdin);
        }

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io_err(std::io::Error::other("stdout not captured")))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| io_err(std::io::Error::other("stderr not captured")))?;
        // Tools may print bytes that are not UTF-8; those are replaced, never fatal.
        let mut out_lines = BufReader::new(stdout).split(b'\n');
        let mut err_lines = BufReader::new(stderr).split(b'\n');
        let mut out_done = false;
        let mut err_done = false;
        let mut lines = Vec::new();

        loop {
            let next = tokio::select! {
                line = out_lines.next_segment(), if !out_done => match line.map_err(io_err)? {
                    Some(line) => Some(line),
                    None => {
                        out_done = true;
                        None
                    }
                },
                line = err_lines.next_segment(), if !err_done => match line.map_err(io_err)? {
                    Some(line) => Some(line),
                    None => {
                        err_done = true;
                        None
                    }
                },
                else => break,
            };
            if let Some(line) = next {
                let line = String::from_utf8_lossy(&line).trim_end().to_string();
                if line.trim().is_empty() {
                    continue;
                }
                on_line(&line);
                lines.push(line);
            }
        }

        let status = child.wait().await.map_err(io_err)?;
        Ok(CommandOutput {
            exit_code: status.code(),
            lines,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[test]
    fn display_masks_secret_arguments() {
        let spec = CommandSpec::new("skopeo")
            .args(["copy", "--all", "--dest-creds"])
            .secret_arg("admin:hunter2")
            .arg("docker://a")
            .stdin("also-secret");
        let shown = spec.to_string();
        assert_eq!(shown, "skopeo copy --all --dest-creds *** docker://a");
        assert!(!format!("{spec:?}").contains("hunter2"));
        assert_eq!(spec.argv()[3], "admin:hunter2");
    }

    #[test]
    fn tail_falls_back_to_exit_code() {
        let output = CommandOutput {
            exit_code: Some(3),
            lines: vec![],
        };
        assert_eq!(output.tail(2), "exit code 3");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn captures_both_streams_and_exit_code() {
        let seen = Mutex::new(Vec::new());
        let spec = CommandSpec::new("sh").args(["-c", "echo out; echo err 1>&2; exit 4"]);
        let output = ProcessRunner
            .run(&spec, &|line| seen.lock().unwrap().push(line.to_string()))
            .await
            .expect("run");
        assert_eq!(output.exit_code, Some(4));
        assert!(!output.success());
        let mut lines = output.lines.clone();
        lines.sort();
        assert_eq!(lines, vec!["err".to_string(), "out".to_string()]);
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stdin_is_delivered_to_child() {
        let spec = CommandSpec::new("sh").args(["-c", "read v; echo got-$v"]).stdin("token\n");
        let output = ProcessRunner.run(&spec, &|_| {}).await.expect("run");
        assert!(output.success());
        assert_eq!(output.lines, vec!["got-token".to_string()]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn invalid_utf8_output_is_replaced_not_fatal() {
        let spec = CommandSpec::new("sh").args(["-c", "printf 'caf\\351 pulled\\n'; exit 0"]);
        let output = ProcessRunner.run(&spec, &|_| {}).await.expect("run");
        assert!(output.success());
        assert_eq!(output.lines, vec!["caf\u{FFFD} pulled".to_string()]);
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_error() {
        let spec = CommandSpec::new("imagesync-definitely-not-installed").arg("--version");
        let err = ProcessRunner.run(&spec, &|_| {}).await.unwrap_err();
        assert!(matches!(err, SyncError::Spawn { .. }), "got: {err}");
    }
}
