//! engram - control CLI
//!
//! Daemon lifecycle (start/stop/status/restart), journal inspection,
//! and git history metrics.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use colored::Colorize;

use engram_core::git::{GitAnalyzer, RepoReader};
use engram_core::observation::ObservationCollector;
use engram_core::{EmbeddingService, InMemoryStore, LocalEmbedder, MetadataStore, VectorStore};
use engram_mcp::daemon::{self, StartOutcome, StopOutcome};

#[derive(Parser)]
#[command(name = "engram", version, about = "Engram agent memory - control CLI")]
struct Cli {
    /// Custom data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Control the background server
    Daemon {
        #[command(subcommand)]
        action: DaemonAction,
    },
    /// Show journal state (session, active entry, resolved count)
    Status,
    /// Files with the most changes in a repository
    Churn {
        /// Repository path
        #[arg(long, default_value = ".")]
        repo: PathBuf,
        /// Day window
        #[arg(long, default_value_t = 90)]
        days: i64,
        /// Maximum files to report
        #[arg(long, default_value_t = 10)]
        limit: usize,
        /// Minimum change count
        #[arg(long, default_value_t = 3)]
        min_changes: usize,
    },
    /// Author statistics for one file
    Authors {
        /// File path within the repository
        file: String,
        /// Repository path
        #[arg(long, default_value = ".")]
        repo: PathBuf,
    },
    /// Grep the working tree and attribute each hit via blame
    BlameSearch {
        /// Pattern to search for
        pattern: String,
        /// Optional file glob
        #[arg(long)]
        glob: Option<String>,
        /// Repository path
        #[arg(long, default_value = ".")]
        repo: PathBuf,
        /// Maximum hits
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[derive(Subcommand)]
enum DaemonAction {
    Start,
    Stop,
    Status,
    Restart,
}

fn resolve_data_dir(flag: Option<PathBuf>) -> PathBuf {
    if let Some(dir) = flag {
        return dir;
    }
    if let Ok(dir) = std::env::var("ENGRAM_DATA_DIR") {
        return PathBuf::from(dir);
    }
    if let Some(dirs) = directories::ProjectDirs::from("dev", "engram", "engram") {
        return dirs.data_dir().to_path_buf();
    }
    PathBuf::from(".engram")
}

fn analyzer_for(repo: &PathBuf) -> anyhow::Result<GitAnalyzer> {
    let reader = Arc::new(RepoReader::discover(repo)?);
    // Metric commands only read history; the store and embedder stay
    // idle unless indexing is requested.
    let store: Arc<dyn VectorStore> = Arc::new(InMemoryStore::new());
    let embedder: Arc<dyn EmbeddingService> = Arc::new(LocalEmbedder::new());
    let metadata = Arc::new(MetadataStore::open_in_memory()?);
    Ok(GitAnalyzer::new(reader, embedder, store, metadata))
}

fn run_daemon_action(action: DaemonAction, data_dir: &PathBuf) -> ExitCode {
    match action {
        DaemonAction::Start => match daemon::start(data_dir) {
            Ok(StartOutcome::Started(pid)) => {
                println!("{} daemon started (pid {pid})", "ok:".green().bold());
                ExitCode::SUCCESS
            }
            Ok(StartOutcome::AlreadyRunning(pid)) => {
                println!("{} daemon already running (pid {pid})", "ok:".green().bold());
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("{} {e}", "error:".red().bold());
                ExitCode::FAILURE
            }
        },
        DaemonAction::Stop => match daemon::stop(data_dir) {
            Ok(StopOutcome::Stopped(pid)) => {
                println!("{} daemon stopped (pid {pid})", "ok:".green().bold());
                ExitCode::SUCCESS
            }
            Ok(StopOutcome::NotRunning) => {
                println!("{} daemon not running", "ok:".green().bold());
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("{} {e}", "error:".red().bold());
                ExitCode::FAILURE
            }
        },
        // Status reports either state with exit code 0
        DaemonAction::Status => {
            match daemon::status(data_dir) {
                Some(pid) => println!("{} running (pid {pid})", "daemon:".bold()),
                None => println!("{} not running", "daemon:".bold()),
            }
            ExitCode::SUCCESS
        }
        DaemonAction::Restart => {
            if let Err(e) = daemon::stop(data_dir) {
                eprintln!("{} {e}", "error:".red().bold());
                return ExitCode::FAILURE;
            }
            run_daemon_action(DaemonAction::Start, data_dir)
        }
    }
}

async fn run_status(data_dir: &PathBuf) -> anyhow::Result<()> {
    let collector = ObservationCollector::new(data_dir.join("journal"))?;

    match collector.get_session_id().await {
        Some(session_id) => println!("{} {session_id}", "session:".bold()),
        None => println!("{} none", "session:".bold()),
    }

    match collector.get_current().await? {
        Some(entry) => {
            println!(
                "{} {} ({} | {}, iteration {})",
                "active:".bold(),
                entry.id.cyan(),
                entry.domain,
                entry.strategy,
                entry.iteration_count
            );
            println!("  goal: {}", entry.goal);
            if collector.has_orphaned_entry().await? {
                println!(
                    "{} entry belongs to a previous session (adopt or abandon it)",
                    "orphan:".yellow().bold()
                );
            }
        }
        None => println!("{} none", "active:".bold()),
    }

    let resolved = collector.get_session_entries().await?;
    println!("{} {} resolved this session", "entries:".bold(), resolved.len());
    Ok(())
}

async fn run_churn(
    repo: PathBuf,
    days: i64,
    limit: usize,
    min_changes: usize,
) -> anyhow::Result<()> {
    let analyzer = analyzer_for(&repo)?;
    let hotspots = analyzer.get_churn_hotspots(days, limit, min_changes).await?;
    if hotspots.is_empty() {
        println!("no files with >= {min_changes} changes in the last {days} days");
        return Ok(());
    }
    println!(
        "{}",
        format!("hotspots over the last {days} days").bold()
    );
    for record in hotspots {
        println!(
            "  {:>4} changes  +{:<6} -{:<6} {} ({} authors)",
            record.change_count,
            record.total_insertions,
            record.total_deletions,
            record.file_path.cyan(),
            record.authors.len()
        );
    }
    Ok(())
}

async fn run_authors(repo: PathBuf, file: String) -> anyhow::Result<()> {
    let analyzer = analyzer_for(&repo)?;
    let authors = analyzer.get_file_authors(&file).await?;
    if authors.is_empty() {
        println!("no history for {file}");
        return Ok(());
    }
    for stats in authors {
        println!(
            "  {:>4} commits  +{:<6} -{:<6} {} <{}>",
            stats.commit_count,
            stats.lines_added,
            stats.lines_removed,
            stats.author.bold(),
            stats.author_email
        );
    }
    Ok(())
}

async fn run_blame_search(
    repo: PathBuf,
    pattern: String,
    glob: Option<String>,
    limit: usize,
) -> anyhow::Result<()> {
    let analyzer = analyzer_for(&repo)?;
    let results = analyzer
        .blame_search(&pattern, glob.as_deref(), limit)
        .await?;
    if results.is_empty() {
        println!("no matches for '{pattern}'");
        return Ok(());
    }
    for hit in results {
        println!(
            "{}:{} {} ({}, {})",
            hit.file_path.cyan(),
            hit.line_number,
            hit.content.trim(),
            hit.author.bold(),
            &hit.sha[..hit.sha.len().min(7)]
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let data_dir = resolve_data_dir(cli.data_dir.clone());

    let result = match cli.command {
        Command::Daemon { action } => return run_daemon_action(action, &data_dir),
        Command::Status => run_status(&data_dir).await,
        Command::Churn {
            repo,
            days,
            limit,
            min_changes,
        } => run_churn(repo, days, limit, min_changes).await,
        Command::Authors { file, repo } => run_authors(repo, file).await,
        Command::BlameSearch {
            pattern,
            glob,
            repo,
            limit,
        } => run_blame_search(repo, pattern, glob, limit).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {e}", "error:".red().bold());
            ExitCode::FAILURE
        }
    }
}
