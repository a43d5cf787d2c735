//! `labd serve`: REST control plane.

use std::net::SocketAddr;

use labgrid_core::LabConfig;
use tokio::sync::watch;
use tracing::info;

use crate::{assemble, shutdown_signal};

pub async fn run(config: LabConfig) -> anyhow::Result<()> {
    info!("labgrid daemon starting");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let orchestrator = assemble(&config, shutdown_rx).await?;

    let router = labgrid_api::build_router(orchestrator);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));

    info!(%addr, "API server starting");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    // In-flight requests drain; their flows stop at the next step boundary.
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(shutdown_tx))
        .await?;

    info!("labgrid daemon stopped");
    Ok(())
}
