//! `imagesync task`: inspect, follow, and cancel sync tasks.

use std::path::Path;
use std::thread::sleep;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};
use colored::{ColoredString, Colorize};
use tabled::{settings::Style, Table, Tabled};

use imagesync_core::{LogEntry, PlatformOutcome, Task, TaskId, TaskStatus};
use imagesync_daemon::{cancel_task, fetch_task, list_tasks};

use super::home;

#[derive(Subcommand, Debug)]
pub enum TaskCommand {
    /// List every task the daemon knows about, oldest first.
    List {
        /// Emit machine-readable JSON.
        #[arg(long)]
        json: bool,
    },
    /// Show one task with its full log.
    Show(ShowArgs),
    /// Stop a running task; it ends as failed.
    Cancel {
        /// Task identifier.
        task_id: String,
    },
}

#[derive(Args, Debug)]
pub struct ShowArgs {
    /// Task identifier.
    pub task_id: String,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,

    /// Keep printing new log lines until the task finishes.
    #[arg(long)]
    pub follow: bool,
}

#[derive(Tabled)]
struct TaskRow {
    #[tabled(rename = "id")]
    id: String,
    #[tabled(rename = "status")]
    status: String,
    #[tabled(rename = "progress")]
    progress: String,
    #[tabled(rename = "strategy")]
    strategy: String,
    #[tabled(rename = "source")]
    source: String,
    #[tabled(rename = "destination")]
    destination: String,
    #[tabled(rename = "created")]
    created: String,
}

#[derive(Tabled)]
struct PlatformRow {
    #[tabled(rename = "platform")]
    platform: String,
    #[tabled(rename = "outcome")]
    outcome: String,
    #[tabled(rename = "detail")]
    detail: String,
}

pub fn run(command: TaskCommand) -> Result<()> {
    let home = home()?;

    match command {
        TaskCommand::List { json } => {
            let tasks = list_tasks(&home).context("failed to list tasks")?;
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&tasks).context("failed to serialize tasks")?
                );
                return Ok(());
            }
            if tasks.is_empty() {
                println!("No tasks.");
                return Ok(());
            }
            let rows: Vec<TaskRow> = tasks
                .into_iter()
                .map(|t| TaskRow {
                    id: t.id.to_string(),
                    status: t.status.to_string(),
                    progress: format!("{}%", t.progress),
                    strategy: t.strategy.map(|s| s.to_string()).unwrap_or_default(),
                    source: t.source,
                    destination: t.destination,
                    created: t.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                })
                .collect();
            let mut table = Table::new(rows);
            table.with(Style::rounded());
            println!("{table}");
        }
        TaskCommand::Show(args) => {
            let id = TaskId::from(args.task_id);
            if args.follow {
                let task = follow(&home, &id, !args.json)?;
                if args.json {
                    print_task_json(&task)?;
                }
                return exit_status(&task);
            }
            let task = fetch_task(&home, &id, 0).with_context(|| format!("failed to fetch task {id}"))?;
            if args.json {
                print_task_json(&task)?;
            } else {
                print_task(&task);
            }
        }
        TaskCommand::Cancel { task_id } => {
            let id = TaskId::from(task_id);
            let outcome = cancel_task(&home, &id).with_context(|| format!("failed to cancel task {id}"))?;
            if outcome.cancelled {
                println!("task {id} cancelled");
            } else {
                println!("task {id} had already finished");
            }
        }
    }

    Ok(())
}

/// Poll `id` until it is terminal, printing new log lines when `stream` is set.
/// Returns the terminal task with its complete log.
pub(crate) fn follow(home: &Path, id: &TaskId, stream: bool) -> Result<Task> {
    let mut offset = 0;
    loop {
        let task = fetch_task(home, id, offset).with_context(|| format!("failed to fetch task {id}"))?;
        if stream {
            for entry in &task.logs {
                print_log_entry(entry);
            }
        }
        if task.status.is_terminal() {
            if offset == 0 {
                return Ok(task);
            }
            return fetch_task(home, id, 0).with_context(|| format!("failed to fetch task {id}"));
        }
        offset = task.log_total;
        sleep(Duration::from_millis(300));
    }
}

/// Non-zero exit for failed tasks.
pub(crate) fn exit_status(task: &Task) -> Result<()> {
    match task.status {
        TaskStatus::Failed => bail!(
            "task {} failed: {}",
            task.id,
            task.error.as_deref().unwrap_or("unknown error")
        ),
        _ => Ok(()),
    }
}

pub(crate) fn print_task_json(task: &Task) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(task).context("failed to serialize task")?
    );
    Ok(())
}

fn print_task(task: &Task) {
    println!("{} {}", "task".bold(), task.id);
    println!("  source:      {}", task.source);
    println!("  destination: {}", task.destination);
    println!("  status:      {} ({}%)", status_label(task.status), task.progress);
    if !task.current_step.is_empty() {
        println!("  step:        {}", task.current_step);
    }
    if let Some(strategy) = task.strategy {
        println!("  strategy:    {strategy}");
    }
    if let Some(error) = &task.error {
        println!("  error:       {}", error.red());
    }

    if !task.platform_results.is_empty() {
        let rows: Vec<PlatformRow> = task
            .platform_results
            .iter()
            .map(|r| PlatformRow {
                platform: r.platform.to_string(),
                outcome: r.outcome.label().to_string(),
                detail: match &r.outcome {
                    PlatformOutcome::Pushed { image } => image.clone(),
                    PlatformOutcome::SkippedMissing { detail } => detail.clone(),
                    PlatformOutcome::Failed { stage, reason } => format!("{stage}: {reason}"),
                },
            })
            .collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
    }

    println!("{}", "log".bold());
    for entry in &task.logs {
        print_log_entry(entry);
    }
}

fn print_log_entry(entry: &LogEntry) {
    println!(
        "{} {}",
        entry.at.format("%H:%M:%S").to_string().bright_black(),
        entry.message
    );
}

pub(crate) fn status_label(status: TaskStatus) -> ColoredString {
    let label = status.to_string();
    match status {
        TaskStatus::Pending => label.bright_black(),
        TaskStatus::Pulling | TaskStatus::Copying | TaskStatus::Pushing => label.yellow(),
        TaskStatus::Success => label.green().bold(),
        TaskStatus::Failed => label.red().bold(),
    }
}
