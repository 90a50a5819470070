//! Engram MCP server
//!
//! Serves the agent-memory tool surface over JSON-RPC on stdio: GHAP
//! tracking, memory storage, unified search, clustering and value
//! formation, and context assembly.
//!
//! With `--daemon` the process runs detached under PID-file control
//! (see the `engram` CLI) instead of speaking stdio.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use engram_core::{EmbeddingService, InMemoryStore, LocalEmbedder, VectorStore};

use engram_mcp::daemon;
use engram_mcp::protocol::stdio::StdioTransport;
use engram_mcp::server::{McpServer, Services};

#[derive(Parser)]
#[command(
    name = "engram-mcp",
    version,
    about = "Agent memory MCP server (GHAP tracking, search, clustering, context assembly)"
)]
struct Args {
    /// Custom data directory (journal, metadata, pid file)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Run detached under PID-file control instead of serving stdio
    #[arg(long)]
    daemon: bool,
}

/// Resolve the data directory: flag, then `ENGRAM_DATA_DIR`, then the
/// platform data dir.
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

fn build_services(data_dir: &std::path::Path) -> anyhow::Result<Services> {
    // The production vector index engine is an external deployment
    // reached through the VectorStore seam; the bundled store keeps a
    // single-process server self-contained.
    let store: Arc<dyn VectorStore> = Arc::new(InMemoryStore::new());
    let embedder: Arc<dyn EmbeddingService> = Arc::new(LocalEmbedder::new());
    let services = Services::new(embedder, store, &data_dir.join("journal"))?;
    Ok(services)
}

#[tokio::main]
async fn main() {
    // stdout is the protocol channel; all logging goes to stderr
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let data_dir = resolve_data_dir(args.data_dir);
    info!(data_dir = %data_dir.display(), version = env!("CARGO_PKG_VERSION"), "engram-mcp starting");

    let services = match build_services(&data_dir) {
        Ok(services) => Arc::new(services),
        Err(e) => {
            error!("failed to initialize services: {e}");
            std::process::exit(1);
        }
    };

    if args.daemon {
        run_daemon(&data_dir).await;
        return;
    }

    let server = McpServer::new(services);
    if let Err(e) = StdioTransport::new().run(server).await {
        error!("transport error: {e}");
        std::process::exit(1);
    }
}

/// Daemon mode: write the PID file, park until SIGTERM/SIGINT, unlink
/// on the way out.
async fn run_daemon(data_dir: &std::path::Path) {
    if let Err(e) = daemon::write_pid_file(data_dir) {
        error!("cannot write pid file: {e}");
        std::process::exit(1);
    }
    info!(pid = std::process::id(), "daemon running");

    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => error!("cannot install SIGTERM handler: {e}"),
        }
    };
    tokio::select! {
        _ = terminate => info!("received SIGTERM"),
        _ = tokio::signal::ctrl_c() => info!("received interrupt"),
    }

    daemon::remove_pid_file(data_dir);
    info!("daemon shut down cleanly");
}
