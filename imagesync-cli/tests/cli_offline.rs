use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn imagesync(home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("imagesync").expect("binary");
    cmd.env("HOME", home.path())
        .env("USERPROFILE", home.path())
        .env_remove("IMAGESYNC_REGISTRY")
        .env_remove("IMAGESYNC_USERNAME")
        .env_remove("IMAGESYNC_PASSWORD");
    cmd
}

#[test]
fn invalid_platform_is_rejected_by_argument_parsing() {
    let home = TempDir::new().expect("home");
    imagesync(&home)
        .args(["sync", "nginx", "--registry", "harbor.x", "--platform", "amd64"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid platform 'amd64'"));
}

#[test]
fn invalid_source_is_rejected_before_contacting_the_daemon() {
    let home = TempDir::new().expect("home");
    imagesync(&home)
        .args(["sync", "Nginx:latest", "--registry", "harbor.x"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid sync request"))
        .stderr(predicate::str::contains("daemon is not running").not());
}

#[test]
fn valid_request_without_daemon_reports_not_running() {
    let home = TempDir::new().expect("home");
    imagesync(&home)
        .args(["sync", "nginx:latest", "--registry", "harbor.x"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("daemon is not running"));
}

#[test]
fn username_without_password_is_an_error() {
    let home = TempDir::new().expect("home");
    imagesync(&home)
        .args(["sync", "nginx", "--registry", "harbor.x", "--username", "admin"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--username requires --password"));
}

#[test]
fn daemon_status_when_stopped_is_json() {
    let home = TempDir::new().expect("home");
    let output = imagesync(&home)
        .args(["daemon", "status"])
        .output()
        .expect("run");
    assert!(output.status.success());
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json");
    assert_eq!(value["running"], serde_json::Value::Bool(false));
}

#[test]
fn set_credentials_offline_saves_privately_and_show_hides_password() {
    let home = TempDir::new().expect("home");
    imagesync(&home)
        .args([
            "config",
            "set-credentials",
            "--registry",
            "harbor.x",
            "--username",
            "admin",
            "--password-stdin",
        ])
        .write_stdin("Harbor12345\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("credentials saved for admin @ harbor.x"));

    let stored = imagesync_core::credential_store::load_at(home.path())
        .expect("load")
        .expect("credentials stored");
    assert_eq!(stored.password, "Harbor12345");

    imagesync(&home)
        .args(["config", "show", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"username\": \"admin\""))
        .stdout(predicate::str::contains("Harbor12345").not());
}
