//! One-shot `deploy` and `teardown` commands.
//!
//! Results are printed to stdout as JSON. Failures print the
//! `{kind, message}` report before the process exits non-zero.

use labgrid_core::LabConfig;
use labgrid_orchestrator::{ErrorReport, OrchestratorError};
use serde::Serialize;
use tokio::sync::watch;
use tracing::info;

use crate::{assemble, shutdown_signal};

pub async fn deploy(config: &LabConfig, start: u32, end: Option<u32>) -> anyhow::Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let orchestrator = assemble(config, shutdown_rx).await?;
    let signal = tokio::spawn(shutdown_signal(shutdown_tx));

    let outcome = match end {
        None => print_outcome(orchestrator.deploy_table(start).await),
        Some(end) => {
            let bulk = orchestrator.deploy_tables(start, end).await;
            if let Ok(bulk) = &bulk {
                info!(succeeded = bulk.succeeded(), failed = bulk.failed(), "bulk deployment done");
            }
            print_outcome(bulk)
        }
    };
    signal.abort();
    outcome
}

pub async fn teardown(config: &LabConfig, table: u32) -> anyhow::Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let orchestrator = assemble(config, shutdown_rx).await?;
    let signal = tokio::spawn(shutdown_signal(shutdown_tx));

    let outcome = print_outcome(orchestrator.delete_table(table).await);
    signal.abort();
    outcome
}

fn print_outcome<T: Serialize>(result: Result<T, OrchestratorError>) -> anyhow::Result<()> {
    match result {
        Ok(value) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
        Err(e) => {
            println!("{}", serde_json::to_string_pretty(&ErrorReport::from(&e))?);
            Err(e.into())
        }
    }
}
