use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use usagehub_daemon::api::validate_sessions_params;
use usagehub_daemon::fetcher::{FetcherConfig, StatsFetcher};
use usagehub_daemon::hub::BroadcastHub;
use usagehub_daemon::ingest::IngestSource;
use usagehub_daemon::orchestrator::Orchestrator;
use usagehub_daemon::store::SnapshotStore;
use usagehub_daemon::ws_server::WsServer;

const DEFAULT_WS_ADDR: &str = "127.0.0.1:8765";
const DEFAULT_INGEST_SOCKET: &str = "/tmp/usagehub/ingest.sock";
const DEFAULT_DB_PATH: &str = "usagehub.db";
const DEFAULT_UPSTREAM_URL: &str = "http://127.0.0.1:8001";
const DEFAULT_TIMEOUT_MS: u64 = 5000;
const DEFAULT_MAX_RETRIES: u32 = 2;

#[derive(Parser)]
#[command(name = "usagehub", about = "Agent usage observability hub")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the hub daemon (default when no subcommand given)
    Daemon {
        /// WebSocket listen address for subscribers
        #[arg(long, default_value = DEFAULT_WS_ADDR)]
        addr: String,

        /// Unix socket path for agent event ingestion
        #[arg(long, default_value = DEFAULT_INGEST_SOCKET)]
        ingest_socket: String,

        /// Snapshot database path
        #[arg(long, default_value = DEFAULT_DB_PATH)]
        db: String,

        /// Upstream statistics service base URL
        #[arg(long, default_value = DEFAULT_UPSTREAM_URL)]
        upstream_url: String,

        /// Per-attempt upstream timeout in milliseconds
        #[arg(long, default_value_t = DEFAULT_TIMEOUT_MS)]
        timeout_ms: u64,

        /// Upstream retry budget after the first attempt
        #[arg(long, default_value_t = DEFAULT_MAX_RETRIES)]
        max_retries: u32,
    },
    /// Print persisted snapshot history (one-shot)
    Sessions {
        /// Snapshot database path
        #[arg(long, default_value = DEFAULT_DB_PATH)]
        db: String,

        /// Restrict to one session id
        #[arg(long)]
        session_id: Option<String>,

        /// Maximum number of snapshots to return
        #[arg(long, default_value_t = 50)]
        limit: u32,

        /// Hours of history to retrieve
        #[arg(long, default_value_t = 24)]
        hours_back: u32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing. Respects RUST_LOG env var, defaults to info.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        // Default to daemon when no subcommand is given.
        None => {
            run_daemon(
                DEFAULT_WS_ADDR.to_string(),
                DEFAULT_INGEST_SOCKET.to_string(),
                DEFAULT_DB_PATH.to_string(),
                DEFAULT_UPSTREAM_URL.to_string(),
                DEFAULT_TIMEOUT_MS,
                DEFAULT_MAX_RETRIES,
            )
            .await?;
        }
        Some(Commands::Daemon {
            addr,
            ingest_socket,
            db,
            upstream_url,
            timeout_ms,
            max_retries,
        }) => {
            run_daemon(addr, ingest_socket, db, upstream_url, timeout_ms, max_retries).await?;
        }
        Some(Commands::Sessions {
            db,
            session_id,
            limit,
            hours_back,
        }) => {
            validate_sessions_params(limit, hours_back)?;
            let store = SnapshotStore::open(Path::new(&db))?;
            let snapshots = store.query(session_id.as_deref(), limit, hours_back)?;
            println!("{}", serde_json::to_string_pretty(&snapshots)?);
        }
    }

    Ok(())
}

async fn run_daemon(
    addr: String,
    ingest_socket: String,
    db: String,
    upstream_url: String,
    timeout_ms: u64,
    max_retries: u32,
) -> anyhow::Result<()> {
    tracing::info!(%addr, %upstream_url, db = %db, "usagehub daemon starting");

    let store = SnapshotStore::open(Path::new(&db))?;

    let mut fetcher_config = FetcherConfig::new(upstream_url);
    fetcher_config.timeout = Duration::from_millis(timeout_ms);
    fetcher_config.max_retries = max_retries;
    let fetcher = StatsFetcher::new(fetcher_config);

    let hub = Arc::new(BroadcastHub::new());
    let orchestrator = Arc::new(Orchestrator::new(fetcher, store, Arc::clone(&hub)));
    let cancel = CancellationToken::new();

    let ingest_path = PathBuf::from(&ingest_socket);
    if let Some(parent) = ingest_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let ingest = IngestSource::new(Arc::clone(&orchestrator), ingest_path, cancel.clone());
    let ingest_handle = tokio::spawn(async move {
        if let Err(e) = ingest.run().await {
            tracing::error!(error = %e, "ingest source failed");
        }
    });

    let ws_addr: std::net::SocketAddr = addr.parse()?;
    let ws_server = WsServer::new(ws_addr, orchestrator, Arc::clone(&hub), cancel.clone());
    let ws_handle = tokio::spawn(async move { ws_server.run().await });

    tokio::signal::ctrl_c().await?;
    tracing::info!(subscribers = hub.len(), "shutdown requested");
    cancel.cancel();

    let _ = ws_handle.await;
    let _ = ingest_handle.await;
    tracing::info!("usagehub daemon stopped");
    Ok(())
}
