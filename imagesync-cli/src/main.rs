//! imagesync: multi-platform container image sync.
//!
//! # Usage
//!
//! ```text
//! imagesync daemon start|stop|status
//! imagesync sync <source> --registry <host> [--project <p>] [--name <n>] [--tag <t>]
//!                [--platform linux/amd64,linux/arm64] [--username <u> --password-stdin]
//!                [--wait] [--json]
//! imagesync task list [--json]
//! imagesync task show <id> [--json] [--follow]
//! imagesync task cancel <id>
//! imagesync config set-credentials --registry <host> --username <u> --password-stdin
//! imagesync config show [--json]
//! imagesync config capabilities [--json]
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{config::ConfigCommand, daemon::DaemonCommand, sync::SyncArgs, task::TaskCommand};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "imagesync",
    version,
    about = "Copy container images to a private registry across CPU architectures",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Submit a sync task to the daemon.
    Sync(SyncArgs),

    /// Inspect, follow, or cancel sync tasks.
    Task {
        #[command(subcommand)]
        command: TaskCommand,
    },

    /// Manage destination credentials and show host capabilities.
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },

    /// Run or control the background daemon.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Sync(args) => args.run(),
        Commands::Task { command } => commands::task::run(command),
        Commands::Config { command } => commands::config::run(command),
        Commands::Daemon { command } => commands::daemon::run(command),
    }
}
