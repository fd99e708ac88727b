//! `imagesync config`: destination credentials and host capabilities.

use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};
use colored::Colorize;

use imagesync_core::{credential_store, Capabilities, Credentials, Settings};
use imagesync_daemon::{configure_credentials, request_capabilities, request_config, DaemonError};

use super::{home, read_password};

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Set the default destination credentials for future tasks.
    SetCredentials(SetCredentialsArgs),
    /// Show configured credentials (never the password) and capabilities.
    Show {
        /// Emit machine-readable JSON.
        #[arg(long)]
        json: bool,
    },
    /// Probe the daemon host for docker, buildx, and the fast-copy tool now.
    Capabilities {
        /// Emit machine-readable JSON.
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args, Debug)]
pub struct SetCredentialsArgs {
    /// Registry host the credentials belong to.
    #[arg(long)]
    pub registry: String,

    #[arg(long)]
    pub username: String,

    /// Password. Prefer `--password-stdin`.
    #[arg(long, conflicts_with = "password_stdin")]
    pub password: Option<String>,

    /// Read the password from stdin.
    #[arg(long)]
    pub password_stdin: bool,
}

pub fn run(command: ConfigCommand) -> Result<()> {
    let home = home()?;

    match command {
        ConfigCommand::SetCredentials(args) => {
            let registry = args.registry.trim().trim_end_matches('/').to_string();
            if registry.is_empty() || args.username.is_empty() {
                bail!("registry and username must not be empty");
            }
            let Some(password) = read_password(args.password, args.password_stdin)? else {
                bail!("--password or --password-stdin is required");
            };
            let credentials = Credentials {
                registry,
                username: args.username,
                password,
            };
            let summary = format!("{} @ {}", credentials.username, credentials.registry);

            match configure_credentials(&home, credentials.clone()) {
                Ok(()) => println!("credentials set for {summary}"),
                Err(DaemonError::DaemonNotRunning { .. }) => {
                    credential_store::save(&credentials).context("failed to save credentials")?;
                    println!("credentials saved for {summary}; the daemon loads them on start");
                }
                Err(err) => return Err(err).context("failed to configure credentials"),
            }
        }
        ConfigCommand::Show { json } => match request_config(&home) {
            Ok(view) => {
                if json {
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&view).context("failed to serialize config")?
                    );
                    return Ok(());
                }
                println!("{}", "daemon: running".green());
                print_credentials(view.registry.as_deref(), view.username.as_deref());
                println!("docker:       {} ({})", view.docker_bin, present(view.capabilities.docker));
                println!("buildx:       {}", present(view.capabilities.buildx));
                println!("fast copy:    {} ({})", view.skopeo_bin, present(view.capabilities.fast_copy));
                println!("prefer fast copy: {}", view.prefer_fast_copy);
                println!("max tasks:    {}", view.max_tasks);
                if let Some(secs) = view.task_timeout_secs {
                    println!("task timeout: {secs}s");
                }
            }
            Err(DaemonError::DaemonNotRunning { .. }) => {
                let settings = Settings::load().context("failed to load settings")?;
                let stored = credential_store::load().context("failed to load credentials")?;
                let current = stored.or(settings.default_credentials.clone());
                if json {
                    let payload = serde_json::json!({
                        "running": false,
                        "registry": current.as_ref().map(|c| c.registry.clone()),
                        "username": current.as_ref().map(|c| c.username.clone()),
                        "docker_bin": settings.docker_bin,
                        "skopeo_bin": settings.skopeo_bin,
                        "prefer_fast_copy": settings.prefer_fast_copy,
                        "max_tasks": settings.max_tasks,
                    });
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&payload)
                            .context("failed to serialize config")?
                    );
                    return Ok(());
                }
                println!("{}", "daemon: not running (capabilities unknown)".yellow());
                print_credentials(
                    current.as_ref().map(|c| c.registry.as_str()),
                    current.as_ref().map(|c| c.username.as_str()),
                );
                println!("docker:       {}", settings.docker_bin);
                println!("fast copy:    {}", settings.skopeo_bin);
            }
            Err(err) => return Err(err).context("failed to query daemon config"),
        },
        ConfigCommand::Capabilities { json } => {
            let found: Capabilities =
                request_capabilities(&home).context("failed to probe daemon host")?;
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&found)
                        .context("failed to serialize capabilities")?
                );
            } else {
                println!("docker:       {}", present(found.docker));
                println!("buildx:       {}", present(found.buildx));
                println!("fast copy:    {}", present(found.fast_copy));
            }
        }
    }

    Ok(())
}

fn print_credentials(registry: Option<&str>, username: Option<&str>) {
    match (registry, username) {
        (Some(registry), Some(username)) => println!("credentials:  {username} @ {registry}"),
        _ => println!("credentials:  none"),
    }
}

fn present(available: bool) -> String {
    if available {
        "available".green().to_string()
    } else {
        "missing".red().to_string()
    }
}
