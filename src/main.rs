//! ferry - copy, move and rename files across disks and archives.
//!
//! Usage:
//!   ferry copy SRC... DST        Copy items into DST
//!   ferry move SRC... DST        Move items into DST
//!   ferry rename PATH NEW_NAME   Rename an item in place
//!   ferry ls PATH                List a directory (also `archive.tar:/inner`)
//!   ferry --help                 Show help

use std::io::{self, BufRead, IsTerminal, Write};
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use color_eyre::eyre::{Context, Result, bail, eyre};
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ferry_core::{
    CancellationToken, ChecksumVerification, Choice, CopyingOptions, ExistBehavior, HostExt,
    HostRef, ItemKind, ListingItem, Resolution, TransferMode,
};
use ferry_ops::{CopyingEvent, JobOutcome, JobReport, OperationProgress, PromptRequest};
use ferry_vfs::{NativeHost, resolve_location};

#[derive(Parser)]
#[command(
    name = "ferry",
    version,
    about = "Copy, move and rename files across disks and archives",
    long_about = "ferry transfers files between native directories and virtual \
                  filesystems.\n\nPaths of the form `archive.tar:/inner/path` \
                  point inside archives (read-only)."
)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Copy items into a destination
    Copy(TransferArgs),

    /// Move items into a destination
    Move(TransferArgs),

    /// Rename a file or directory in place
    Rename {
        /// Item to rename
        path: String,

        /// New name (no path separators)
        new_name: String,

        /// Print the final report as JSON
        #[arg(long)]
        json: bool,
    },

    /// List a directory
    Ls {
        /// Directory to list
        #[arg(default_value = ".")]
        path: String,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },
}

#[derive(Args)]
struct TransferArgs {
    /// Sources followed by the destination
    #[arg(required = true, num_args = 2..)]
    paths: Vec<String>,

    /// Verify written files against source checksums
    #[arg(long)]
    verify: bool,

    /// What to do when a destination already exists
    #[arg(long, value_enum)]
    on_conflict: Option<ConflictPolicy>,

    /// Load options from a JSON file; flags override it
    #[arg(long)]
    options: Option<PathBuf>,

    /// Do not copy extended attributes
    #[arg(long)]
    no_xattrs: bool,

    /// Print the final report as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ConflictPolicy {
    Ask,
    Skip,
    Overwrite,
    OverwriteOlder,
    Append,
    KeepBoth,
}

impl From<ConflictPolicy> for ExistBehavior {
    fn from(policy: ConflictPolicy) -> Self {
        match policy {
            ConflictPolicy::Ask => Self::Ask,
            ConflictPolicy::Skip => Self::SkipAll,
            ConflictPolicy::Overwrite => Self::OverwriteAll,
            ConflictPolicy::OverwriteOlder => Self::OverwriteOlder,
            ConflictPolicy::Append => Self::AppendAll,
            ConflictPolicy::KeepBoth => Self::KeepBoth,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::Copy(args) => run_transfer(args, TransferMode::Copy).await,
        Command::Move(args) => run_transfer(args, TransferMode::Move).await,
        Command::Rename {
            path,
            new_name,
            json,
        } => run_rename(&path, &new_name, json).await,
        Command::Ls { path, format } => run_ls(&path, format),
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

/// Make a location absolute, keeping any `archive:` prefix intact.
fn absolute(location: &str) -> Result<String> {
    let (outer, inner) = match ferry_vfs::split_archive_location(location) {
        Some((outer, inner)) => (outer, Some(inner)),
        None => (location, None),
    };
    let mut outer_abs = std::path::absolute(outer)
        .with_context(|| format!("Invalid path: {outer}"))?
        .to_string_lossy()
        .into_owned();
    // Keep the trailing slash that selects "into this directory".
    if outer.ends_with('/') && !outer_abs.ends_with('/') {
        outer_abs.push('/');
    }
    Ok(match inner {
        Some(inner) => format!("{outer_abs}:{inner}"),
        None => outer_abs,
    })
}

fn load_options(args: &TransferArgs, mode: TransferMode) -> Result<CopyingOptions> {
    let mut options = match &args.options {
        Some(file) => {
            let text = std::fs::read_to_string(file)
                .with_context(|| format!("Cannot read options file {}", file.display()))?;
            serde_json::from_str::<CopyingOptions>(&text).context("Invalid options file")?
        }
        None => CopyingOptions::default(),
    };
    options.mode = mode;
    if args.verify {
        options.verification = ChecksumVerification::Always;
    }
    if let Some(policy) = args.on_conflict {
        options.exist_behavior = policy.into();
    }
    if args.no_xattrs {
        options.copy_xattrs = false;
    }
    Ok(options)
}

async fn run_transfer(args: TransferArgs, mode: TransferMode) -> Result<()> {
    let options = load_options(&args, mode)?;
    let Some((destination, sources)) = args.paths.split_last() else {
        bail!("Missing destination");
    };

    let native = NativeHost::shared();
    let cancel = CancellationToken::new();

    let mut items: Vec<ListingItem> = Vec::with_capacity(sources.len());
    for source in sources {
        let (host, path) = resolve_location(&native, &absolute(source)?, &cancel)
            .with_context(|| format!("Cannot open {source}"))?;
        let listing = host
            .fetch_single_item_listing(&path, &cancel)
            .with_context(|| format!("Cannot stat {source}"))?;
        items.extend(listing.items());
    }

    let destination = absolute(destination)?;
    if ferry_vfs::split_archive_location(&destination).is_some() {
        bail!("Archives are read-only: {destination}");
    }

    info!(sources = sources.len(), destination = %destination, ?mode, "Starting transfer");
    let interactive = io::stdin().is_terminal();
    let (handle, events) = ferry_ops::start_copying(items, destination, native, options);
    let report = drive(events, interactive && !args.json).await?;
    let report = match report {
        Some(report) => report,
        None => handle.wait().await?,
    };
    finish(&report, args.json)
}

async fn run_rename(path: &str, new_name: &str, json: bool) -> Result<()> {
    let native = NativeHost::shared();
    let (handle, events) = ferry_ops::start_rename(&native, &absolute(path)?, new_name)?;
    let interactive = io::stdin().is_terminal();
    let report = match drive(events, interactive && !json).await? {
        Some(report) => report,
        None => handle.wait().await?,
    };
    finish(&report, json)
}

/// Consume job events until the job completes.
async fn drive(
    mut events: mpsc::Receiver<CopyingEvent>,
    show_progress: bool,
) -> Result<Option<JobReport>> {
    while let Some(event) = events.recv().await {
        match event {
            CopyingEvent::Progress(progress) => {
                if show_progress {
                    print_progress(&progress);
                }
            }
            CopyingEvent::Prompt(request) => {
                let answer = if io::stdin().is_terminal() {
                    let view = PromptView::from(&request);
                    tokio::task::spawn_blocking(move || ask(&view))
                        .await
                        .map_err(|e| eyre!("Prompt task failed: {e}"))??
                } else {
                    non_interactive_answer(&request)
                };
                request.respond(answer);
            }
            CopyingEvent::Complete(report) => {
                if show_progress {
                    eprintln!();
                }
                return Ok(Some(report));
            }
        }
    }
    Ok(None)
}

fn print_progress(progress: &OperationProgress) {
    let current = progress.current_item.as_deref().unwrap_or("");
    eprint!(
        "\r{:>9} {:>5.1}% {}/{} {} / {}  {}",
        progress.stage.to_string(),
        progress.percentage(),
        progress.items_completed,
        progress.items_total,
        format_size(progress.bytes_processed),
        format_size(progress.bytes_total),
        truncate(current, 40),
    );
    let _ = io::stderr().flush();
}

fn non_interactive_answer(request: &PromptRequest) -> Resolution {
    if request.offers(Choice::Skip) {
        Resolution::Skip
    } else {
        Resolution::Abort
    }
}

/// The parts of a prompt shown to the user.
struct PromptView {
    title: String,
    detail: Option<String>,
    choices: Vec<Choice>,
}

impl From<&PromptRequest> for PromptView {
    fn from(request: &PromptRequest) -> Self {
        let title = match &request.destination {
            Some(destination) => format!("{}: {} -> {}", request.category, request.path, destination),
            None => format!("{}: {}", request.category, request.path),
        };
        let detail = match (&request.error, &request.source_stat, &request.destination_stat) {
            (Some(error), _, _) => Some(error.clone()),
            (None, Some(src), Some(dst)) => Some(format!(
                "source {}, existing {}",
                format_size(src.size),
                format_size(dst.size)
            )),
            _ => None,
        };
        Self {
            title,
            detail,
            choices: request.choices.clone(),
        }
    }
}

/// Ask on the terminal until a valid choice is entered.
fn ask(view: &PromptView) -> Result<Resolution> {
    let stdin = io::stdin();
    let mut stderr = io::stderr();
    loop {
        writeln!(stderr)?;
        writeln!(stderr, "{}", view.title)?;
        if let Some(detail) = &view.detail {
            writeln!(stderr, "  {detail}")?;
        }
        for (i, choice) in view.choices.iter().enumerate() {
            writeln!(stderr, "  [{}] {}", i + 1, choice)?;
        }
        write!(stderr, "> ")?;
        stderr.flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            return Ok(Resolution::Abort);
        }
        let Some(choice) = line
            .trim()
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|i| view.choices.get(i).copied())
        else {
            continue;
        };

        return Ok(match choice {
            Choice::Retry => Resolution::Retry,
            Choice::Skip => Resolution::Skip,
            Choice::SkipAll => Resolution::SkipAll,
            Choice::Overwrite => Resolution::Overwrite,
            Choice::OverwriteAll => Resolution::OverwriteAll,
            Choice::Append => Resolution::Append,
            Choice::AppendAll => Resolution::AppendAll,
            Choice::AutoRename => Resolution::AutoRename,
            Choice::Abort => Resolution::Abort,
            Choice::Rename => {
                write!(stderr, "New name: ")?;
                stderr.flush()?;
                let mut name = String::new();
                stdin.lock().read_line(&mut name)?;
                Resolution::Rename(name.trim_end_matches(['\r', '\n']).to_string())
            }
        });
    }
}

fn finish(report: &JobReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        println!("{}", report.summary());
        println!(
            " {} in {:.2}s",
            format_size(report.bytes_processed),
            report.duration.as_secs_f64()
        );
        for skipped in &report.skipped {
            println!("  skipped {} ({}): {}", skipped.path, skipped.category, skipped.message);
        }
    }

    match &report.outcome {
        JobOutcome::Completed => Ok(()),
        JobOutcome::Cancelled => bail!("Operation stopped"),
        JobOutcome::Failed { reason } => bail!("Operation failed: {reason}"),
    }
}

fn run_ls(location: &str, format: OutputFormat) -> Result<()> {
    let native = NativeHost::shared();
    let cancel = CancellationToken::new();
    let (host, path): (HostRef, String) = resolve_location(&native, &absolute(location)?, &cancel)
        .with_context(|| format!("Cannot open {location}"))?;
    let listing = host
        .fetch_directory_listing(&path, &cancel)
        .with_context(|| format!("Cannot list {location}"))?;

    match format {
        OutputFormat::Text => {
            for entry in listing.entries() {
                let marker = match entry.stat.kind() {
                    ItemKind::Directory => "d",
                    ItemKind::Symlink => "l",
                    ItemKind::File => "-",
                    ItemKind::Other => "?",
                };
                let name = match &entry.symlink_target {
                    Some(target) => format!("{} -> {}", entry.name, target),
                    None => entry.name.to_string(),
                };
                println!(
                    "{} {:o} {:>10}  {}",
                    marker,
                    entry.stat.permissions(),
                    format_size(entry.stat.size),
                    name
                );
            }
        }
        OutputFormat::Json => {
            let entries: Vec<serde_json::Value> = listing
                .entries()
                .iter()
                .map(|entry| {
                    serde_json::json!({
                        "name": entry.name.as_str(),
                        "kind": format!("{:?}", entry.stat.kind()),
                        "size": entry.stat.size,
                        "mode": entry.stat.permissions(),
                        "symlink_target": entry.symlink_target,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
    }
    Ok(())
}

/// Format size in human-readable form.
fn format_size(bytes: u64) -> String {
    humansize::format_size(bytes, humansize::BINARY)
}

/// Truncate a string to max length, keeping the end.
fn truncate(s: &str, max_len: usize) -> String {
    let count = s.chars().count();
    if count <= max_len {
        s.to_string()
    } else {
        let tail: String = s.chars().skip(count - max_len + 1).collect();
        format!("…{tail}")
    }
}
