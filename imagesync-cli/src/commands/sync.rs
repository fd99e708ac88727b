//! `imagesync sync`: submit a sync task and optionally wait for it.

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;

use imagesync_core::{Platform, RequestCredentials, SyncRequest};
use imagesync_daemon::submit_sync;

use super::task::{exit_status, follow, print_task_json, status_label};
use super::{home, read_password};

/// Arguments for `imagesync sync`.
#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Source image, e.g. `nginx:1.25` or `ghcr.io/org/app:v2`.
    pub source: String,

    /// Destination registry host.
    #[arg(long)]
    pub registry: String,

    /// Destination project or namespace (default `library`).
    #[arg(long)]
    pub project: Option<String>,

    /// Destination image name (default: source repository name).
    #[arg(long)]
    pub name: Option<String>,

    /// Destination tag (default: source tag).
    #[arg(long)]
    pub tag: Option<String>,

    /// Target platforms, comma separated or repeated (default linux/amd64,linux/arm64).
    #[arg(long = "platform", value_delimiter = ',')]
    pub platforms: Vec<Platform>,

    /// Destination username; overrides configured credentials for this task.
    #[arg(long)]
    pub username: Option<String>,

    /// Destination password. Prefer `--password-stdin`.
    #[arg(long, conflicts_with = "password_stdin", requires = "username")]
    pub password: Option<String>,

    /// Read the destination password from stdin.
    #[arg(long, requires = "username")]
    pub password_stdin: bool,

    /// Stream the task log and exit when it finishes; non-zero exit on failure.
    #[arg(long)]
    pub wait: bool,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl SyncArgs {
    pub fn run(self) -> Result<()> {
        let home = home()?;
        let (wait, json) = (self.wait, self.json);
        let request = self.into_request()?;

        let plan = request.validate().context("invalid sync request")?;
        let accepted = submit_sync(&home, request).context("failed to submit sync task")?;

        if !wait {
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&accepted).context("failed to serialize task")?
                );
            } else {
                println!(
                    "task {} accepted: {} -> {}",
                    accepted.task_id.to_string().bold(),
                    plan.source,
                    accepted.destination
                );
                println!("follow with: imagesync task show {} --follow", accepted.task_id);
            }
            return Ok(());
        }

        if !json {
            println!(
                "task {} accepted: {} -> {}",
                accepted.task_id.to_string().bold(),
                plan.source,
                accepted.destination
            );
        }
        let task = follow(&home, &accepted.task_id, !json)?;
        if json {
            print_task_json(&task)?;
        } else {
            println!("{} {}", status_label(task.status), task.destination);
        }
        exit_status(&task)
    }

    fn into_request(self) -> Result<SyncRequest> {
        let mut request = SyncRequest::new(self.source, self.registry);
        request.target_project = self.project;
        request.target_image_name = self.name;
        request.target_tag = self.tag;
        if !self.platforms.is_empty() {
            request.platforms = self.platforms;
        }

        let password = read_password(self.password, self.password_stdin)?;
        request.credentials = match (self.username, password) {
            (Some(username), Some(password)) => Some(RequestCredentials { username, password }),
            (Some(_), None) => bail!("--username requires --password or --password-stdin"),
            (None, _) => None,
        };
        Ok(request)
    }
}
