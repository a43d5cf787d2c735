//! labd: the labgrid daemon.
//!
//! Single binary that wires the ledger, the cluster client and the
//! orchestrator together, then either serves the REST API or runs one
//! deployment or teardown and prints the result as JSON.
//!
//! # Usage
//!
//! ```text
//! labd --config /etc/labgrid/labgrid.toml serve --port 8080
//! labd deploy --start 3 --end 5
//! labd teardown --table 4
//! ```

mod commands;
mod server;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use labgrid_core::LabConfig;
use labgrid_orchestrator::{Orchestrator, TaskWaiter};
use labgrid_state::StateStore;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,labd=debug,labgrid=debug";

#[derive(Parser)]
#[command(name = "labd", about = "labgrid lab deployment daemon")]
struct Cli {
    /// Configuration file.
    #[arg(long, global = true, default_value = "/etc/labgrid/labgrid.toml")]
    config: PathBuf,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the REST API.
    Serve {
        /// Port to listen on (overrides `server.port`).
        #[arg(long)]
        port: Option<u16>,

        /// Data directory for the ledger (overrides `server.data_dir`).
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
    /// Deploy one table, or every table in `start..=end`.
    Deploy {
        #[arg(long)]
        start: u32,

        #[arg(long)]
        end: Option<u32>,

        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
    /// Tear down one table.
    Teardown {
        #[arg(long)]
        table: u32,

        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let mut config = LabConfig::from_file(&cli.config)?;
    info!(path = ?cli.config, "configuration loaded");

    match cli.command {
        Command::Serve { port, data_dir } => {
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(dir) = data_dir {
                config.server.data_dir = dir;
            }
            server::run(config).await
        }
        Command::Deploy {
            start,
            end,
            data_dir,
        } => {
            if let Some(dir) = data_dir {
                config.server.data_dir = dir;
            }
            commands::deploy(&config, start, end).await
        }
        Command::Teardown { table, data_dir } => {
            if let Some(dir) = data_dir {
                config.server.data_dir = dir;
            }
            commands::teardown(&config, table).await
        }
    }
}

/// Logs go to stderr so command output on stdout stays machine-readable.
fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Open the ledger, connect to the cluster and build the orchestrator.
async fn assemble(
    config: &LabConfig,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<Arc<Orchestrator>> {
    let db_path = ledger_path(&config.server.data_dir)?;
    let state = StateStore::open(&db_path)?;
    info!(path = ?db_path, "ledger opened");

    let cluster = labgrid_cluster::connect(&config.cluster).await?;
    info!(endpoint = cluster.endpoint(), "cluster connected");

    let orchestrator = Orchestrator::new(
        Arc::new(cluster),
        state,
        TaskWaiter::from_config(&config.tasks),
        config.provisioning.clone(),
    )
    .with_shutdown(shutdown);
    Ok(Arc::new(orchestrator))
}

fn ledger_path(data_dir: &Path) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(data_dir)?;
    Ok(data_dir.join("labgrid.redb"))
}

/// Flip `shutdown` on Ctrl-C. Flows finish their current step and stop.
async fn shutdown_signal(shutdown: watch::Sender<bool>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
    let _ = shutdown.send(true);
}
