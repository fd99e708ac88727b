#![cfg(unix)]

use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};

use tempfile::TempDir;

fn imagesync_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_imagesync"))
}

/// Stand-in for the docker CLI: records every invocation, reports arm64 as
/// absent from the source, and rejects pushes when `deny_push` is set.
fn write_fake_docker(dir: &Path, deny_push: bool) -> (PathBuf, PathBuf) {
    let calls = dir.join("docker-calls.log");
    let script = dir.join("fake-docker");
    let push_branch = if deny_push {
        "echo 'denied: requested access to the resource is denied' >&2; exit 1"
    } else {
        "echo \"pushed $2\""
    };
    let body = format!(
        r#"#!/bin/sh
echo "$*" >> '{calls}'
case "$1" in
  login) cat > /dev/null; echo 'Login Succeeded' ;;
  pull)
    if [ "$3" = "linux/arm64" ]; then
      echo 'no matching manifest for linux/arm64 in the manifest list entries' >&2
      exit 1
    fi
    echo "pulled $4" ;;
  push) {push_branch} ;;
esac
exit 0
"#,
        calls = calls.display(),
    );
    fs::write(&script, body).expect("write fake docker");
    fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).expect("chmod fake docker");
    (script, calls)
}

struct DaemonProcess {
    child: Child,
    home: PathBuf,
}

impl DaemonProcess {
    fn start(home: &Path, docker: &Path) -> Self {
        let child = Command::new(imagesync_bin())
            .env("HOME", home)
            .env("USERPROFILE", home)
            .env("IMAGESYNC_DOCKER_BIN", docker)
            .env("IMAGESYNC_SKOPEO_BIN", home.join("no-such-skopeo"))
            .env_remove("IMAGESYNC_REGISTRY")
            .env_remove("IMAGESYNC_USERNAME")
            .env_remove("IMAGESYNC_PASSWORD")
            .args(["daemon", "start"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn daemon");

        let daemon = Self {
            child,
            home: home.to_path_buf(),
        };
        assert!(
            wait_until(Duration::from_secs(10), || daemon_running(home)),
            "daemon did not come up"
        );
        daemon
    }

    fn stop(&mut self) {
        let _ = cli(&self.home).args(["daemon", "stop"]).status();

        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if let Ok(Some(_)) = self.child.try_wait() {
                return;
            }
            sleep(Duration::from_millis(50));
        }

        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

impl Drop for DaemonProcess {
    fn drop(&mut self) {
        self.stop();
    }
}

fn cli(home: &Path) -> Command {
    let mut cmd = Command::new(imagesync_bin());
    cmd.env("HOME", home).env("USERPROFILE", home);
    cmd
}

fn daemon_running(home: &Path) -> bool {
    let Ok(output) = cli(home).args(["daemon", "status"]).output() else {
        return false;
    };
    if !output.status.success() {
        return false;
    }
    let Ok(value) = serde_json::from_slice::<serde_json::Value>(&output.stdout) else {
        return false;
    };
    value
        .get("running")
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(100));
    }
    false
}

fn sync_and_wait(home: &Path, password: &str) -> Output {
    let mut child = cli(home)
        .args([
            "sync",
            "nginx:latest",
            "--registry",
            "harbor.x",
            "--username",
            "admin",
            "--password-stdin",
            "--wait",
            "--json",
        ])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn sync");
    child
        .stdin
        .take()
        .expect("stdin")
        .write_all(format!("{password}\n").as_bytes())
        .expect("write password");
    child.wait_with_output().expect("sync output")
}

fn platform_outcome<'a>(task: &'a serde_json::Value, platform: &str) -> &'a str {
    task["platform_results"]
        .as_array()
        .expect("platform_results")
        .iter()
        .find(|r| r["platform"] == platform)
        .and_then(|r| r["outcome"].as_str())
        .unwrap_or("absent")
}

#[test]
fn missing_arm64_variant_still_publishes_amd64() {
    let home = TempDir::new().expect("home");
    let (docker, calls) = write_fake_docker(home.path(), false);
    let _daemon = DaemonProcess::start(home.path(), &docker);

    let output = sync_and_wait(home.path(), "Harbor12345");
    assert!(
        output.status.success(),
        "sync failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let task: serde_json::Value = serde_json::from_slice(&output.stdout).expect("task json");
    assert_eq!(task["status"], "success");
    assert_eq!(task["progress"], 100);
    assert_eq!(task["destination"], "harbor.x/library/nginx:latest");
    assert_eq!(platform_outcome(&task, "linux/amd64"), "pushed");
    assert_eq!(platform_outcome(&task, "linux/arm64"), "skipped_missing");

    let calls = fs::read_to_string(calls).expect("docker calls");
    assert!(calls.contains("login -u admin --password-stdin harbor.x"));
    assert!(calls.contains("manifest create harbor.x/library/nginx:latest"));
    assert!(!calls.contains("Harbor12345"), "password leaked into argv");

    let listed = cli(home.path())
        .args(["task", "list", "--json"])
        .output()
        .expect("task list");
    assert!(listed.status.success());
    let tasks: serde_json::Value = serde_json::from_slice(&listed.stdout).expect("list json");
    assert_eq!(tasks.as_array().map(Vec::len), Some(1));

    let probed = cli(home.path())
        .args(["config", "capabilities", "--json"])
        .output()
        .expect("capabilities");
    assert!(probed.status.success());
    let found: serde_json::Value = serde_json::from_slice(&probed.stdout).expect("capabilities json");
    assert_eq!(found["docker"], true);
    assert_eq!(found["fast_copy"], false);
}

#[test]
fn rejected_push_fails_the_task_with_non_zero_exit() {
    let home = TempDir::new().expect("home");
    let (docker, _calls) = write_fake_docker(home.path(), true);
    let _daemon = DaemonProcess::start(home.path(), &docker);

    let output = sync_and_wait(home.path(), "wrong");
    assert!(!output.status.success());

    let task: serde_json::Value = serde_json::from_slice(&output.stdout).expect("task json");
    assert_eq!(task["status"], "failed");
    assert!(task["error"].as_str().is_some_and(|e| !e.is_empty()));
    let log = task["logs"].to_string();
    assert!(log.contains("authentication failed during push of linux/amd64"));
}
