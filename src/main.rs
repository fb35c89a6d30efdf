//! skiff - move files and directory trees between a local disk and a remote
//! session with live progress.
//!
//! Usage:
//!   skiff push <SOURCES>... --remote-root <DIR> [--to <PATH>]   Upload
//!   skiff pull <PATHS>... --remote-root <DIR> [--to <DIR>]      Download
//!   skiff --help                                               Show help
//!
//! The remote side is a directory on this machine opened as a session, so
//! every engine strategy (streaming, buffered, archive) can be exercised.

use std::collections::{HashMap, VecDeque};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use color_eyre::eyre::{Context, Result, bail};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing_subscriber::EnvFilter;

use skiff_core::{ConflictDirective, TaskId, TransferConfig};
use skiff_ops::{Destination, LocalBridge, RunReport, TransferEngine, TransferEvent};
use skiff_scan::ScanInput;

#[derive(Parser)]
#[command(
    name = "skiff",
    version,
    about = "Move files and directory trees with live progress",
    long_about = "skiff moves files and folders between the local disk and a remote \
                  session, one entry at a time, with per-folder progress, \
                  conflict handling and cancellation (Ctrl-C)."
)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace); RUST_LOG overrides
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Print events and the final report as JSON lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Upload local files and folders into the remote session
    Push {
        /// Files or folders to upload
        #[arg(required = true)]
        sources: Vec<PathBuf>,

        /// Directory backing the remote session
        #[arg(long)]
        remote_root: PathBuf,

        /// Destination directory inside the session
        #[arg(long, default_value = "/")]
        to: String,

        /// Send folders as one compressed archive
        #[arg(short, long)]
        compress: bool,

        #[command(flatten)]
        conflicts: ConflictArgs,
    },

    /// Download files and folders from the remote session
    Pull {
        /// Paths inside the session to download
        #[arg(required = true)]
        paths: Vec<String>,

        /// Directory backing the remote session
        #[arg(long)]
        remote_root: PathBuf,

        /// Local destination directory
        #[arg(long, default_value = ".")]
        to: PathBuf,

        #[command(flatten)]
        conflicts: ConflictArgs,
    },
}

#[derive(clap::Args)]
struct ConflictArgs {
    /// What to do when a destination file already exists
    #[arg(long, value_enum, default_value = "ask-none")]
    on_conflict: ConflictPolicy,

    /// Skip existence checks; the destination is known to be empty
    #[arg(long)]
    assume_empty: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ConflictPolicy {
    /// Overwrite existing files
    Replace,
    /// Leave existing files and cancel their tasks
    Skip,
    /// Write next to existing files as "name (copy).ext"
    Duplicate,
    /// Report conflicts and leave them unresolved
    AskNone,
}

impl ConflictPolicy {
    fn directive(self) -> Option<ConflictDirective> {
        match self {
            Self::Replace => Some(ConflictDirective::Replace),
            Self::Skip => Some(ConflictDirective::Skip),
            Self::Duplicate => Some(ConflictDirective::Duplicate),
            Self::AskNone => None,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let bridge = Arc::new(LocalBridge::new());
    let (inputs, destination, conflicts, compress) = match cli.command {
        Command::Push {
            sources,
            remote_root,
            to,
            compress,
            conflicts,
        } => {
            let root = remote_root.canonicalize().context("Invalid remote root")?;
            let session = bridge.open_session(root);
            let inputs = sources.into_iter().map(ScanInput::path).collect();
            (inputs, Destination::remote(session, to), conflicts, compress)
        }
        Command::Pull {
            paths,
            remote_root,
            to,
            conflicts,
        } => {
            let root = remote_root.canonicalize().context("Invalid remote root")?;
            let session = bridge.open_session(root);
            let to = to.canonicalize().context("Invalid destination")?;
            let inputs = paths
                .into_iter()
                .map(|path| ScanInput::remote(session.clone(), path))
                .collect();
            (
                inputs,
                Destination::local(to.to_string_lossy()),
                conflicts,
                false,
            )
        }
    };

    let config = TransferConfig::builder()
        .compress_folders(compress)
        .destination_known_empty(conflicts.assume_empty)
        .build()
        .context("Invalid transfer configuration")?;
    let engine = Arc::new(TransferEngine::new(bridge, config));

    let printer = tokio::spawn(print_events(engine.subscribe(), cli.json));
    let canceller = engine.clone();
    let interrupt = tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nCancelling...");
            canceller.cancel().await;
        }
    });

    let mut report = engine.transfer(inputs, destination).await;
    if let Some(directive) = conflicts.on_conflict.directive() {
        resolve_all(&engine, &mut report, directive).await;
    }

    interrupt.abort();
    let _ = interrupt.await;
    drop(engine);
    printer.await.context("Event printer stopped")??;

    print_report(&report, cli.json)?;
    if report.failed() > 0 {
        bail!("{} item(s) failed", report.failed());
    }
    Ok(())
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Apply one directive to every pending conflict, including those a resumed folder raises.
async fn resolve_all(engine: &TransferEngine, report: &mut RunReport, directive: ConflictDirective) {
    let mut queue: VecDeque<_> = std::mem::take(&mut report.conflicts).into();
    while let Some(pending) = queue.pop_front() {
        if engine.controller().is_cancelled() {
            queue.push_front(pending);
            break;
        }
        let resumed = engine.resolve(pending, directive).await;
        report.results.extend(resumed.results);
        queue.extend(resumed.conflicts);
    }
    report.conflicts = queue.into();
}

/// Print events until the engine is dropped.
async fn print_events(mut rx: UnboundedReceiver<TransferEvent>, json: bool) -> Result<()> {
    let mut names: HashMap<TaskId, String> = HashMap::new();
    let mut stderr = std::io::stderr();

    while let Some(event) = rx.recv().await {
        if json {
            println!("{}", serde_json::to_string(&event)?);
            continue;
        }

        match event {
            TransferEvent::ScanningStarted => eprintln!("Scanning..."),
            TransferEvent::ScanningProgress {
                files,
                directories,
                bytes,
                current_dir,
            } => {
                write!(
                    stderr,
                    "\r\x1b[K {files} files, {directories} folders, {}  {}",
                    format_size(bytes),
                    truncate(&current_dir, 40),
                )?;
                stderr.flush()?;
            }
            TransferEvent::ScanningFinished { entries, warnings } => {
                eprintln!("\r\x1b[KFound {entries} entries ({warnings} warnings)");
            }
            TransferEvent::TaskCreated(task) => {
                names.insert(task.id, task.name);
            }
            TransferEvent::TaskRenamed { id, label } => {
                names.insert(id, label);
            }
            TransferEvent::TaskProgress(update) => {
                let name = names.get(&update.id).map(String::as_str).unwrap_or("?");
                write!(
                    stderr,
                    "\r\x1b[K {:>5.1}%  {} / {}  {}/s  {}",
                    update.percent,
                    format_size(update.transferred),
                    format_size(update.total),
                    format_size(update.speed as u64),
                    truncate(name, 40),
                )?;
                stderr.flush()?;
            }
            TransferEvent::TaskCompleted(id) => {
                eprintln!("\r\x1b[K done       {}", task_name(&names, id));
            }
            TransferEvent::TaskFailed { id, error } => {
                eprintln!("\r\x1b[K failed     {}: {error}", task_name(&names, id));
            }
            TransferEvent::TaskCancelled(id) => {
                eprintln!("\r\x1b[K cancelled  {}", task_name(&names, id));
            }
            TransferEvent::ConflictDetected(conflict) => {
                eprintln!(
                    "\r\x1b[K conflict   {} exists ({} -> {})",
                    conflict.destination_path,
                    format_size(conflict.existing_size),
                    format_size(conflict.new_size),
                );
            }
        }
    }
    Ok(())
}

fn print_report(report: &RunReport, json: bool) -> Result<()> {
    if json {
        let conflicts: Vec<_> = report.conflicts.iter().map(|p| &p.conflict).collect();
        let summary = serde_json::json!({
            "succeeded": report.succeeded(),
            "failed": report.failed(),
            "cancelled": report.cancelled(),
            "results": report.results,
            "conflicts": conflicts,
            "warnings": report.warnings,
        });
        println!("{}", serde_json::to_string(&summary)?);
        return Ok(());
    }

    println!();
    println!("{}", "─".repeat(60));
    println!(" {}", report.summary());
    println!("{}", "─".repeat(60));

    for result in report.results.iter().filter(|r| !r.success && !r.cancelled) {
        println!(
            " ✗ {}: {}",
            result.relative_path,
            result.error.as_deref().unwrap_or("unknown error")
        );
    }
    for pending in &report.conflicts {
        println!(
            " ? {} already exists (use --on-conflict to resolve)",
            pending.conflict.destination_path
        );
    }
    if !report.warnings.is_empty() {
        println!();
        println!("{} warning(s) during scan", report.warnings.len());
        for warning in &report.warnings {
            println!("   {}: {}", warning.path, warning.message);
        }
    }
    Ok(())
}

fn task_name(names: &HashMap<TaskId, String>, id: TaskId) -> String {
    names.get(&id).cloned().unwrap_or_else(|| id.to_string())
}

/// Format bytes as human-readable size.
fn format_size(bytes: u64) -> String {
    humansize::format_size(bytes, humansize::BINARY)
}

/// Truncate a string to max length.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len - 1).collect();
        format!("{head}…")
    }
}
