//! `cradled serve`: the long-running HTTP service.

use std::net::SocketAddr;

use cradle_api::{AppState, ControllerClient, build_router};
use cradle_core::CradleConfig;
use cradle_orchestrator::Orchestrator;
use tracing::{info, warn};

pub async fn run(config: CradleConfig, orchestrator: Orchestrator) -> anyhow::Result<()> {
    info!("Cradle daemon starting");

    match orchestrator.ping().await {
        Ok(()) => info!("container runtime reachable"),
        Err(e) => warn!(error = %e, "container runtime not reachable yet"),
    }

    let controller = ControllerClient::from_config(&config.controller);
    match &controller {
        Some(_) => info!(url = ?config.controller.url, "controller reporting enabled"),
        None => info!("no controller configured, container IDs will not be reported"),
    }

    let state = AppState::new(orchestrator, controller, config.server.max_upload_bytes);
    let router = build_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));

    info!(%addr, "API server starting");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Cradle daemon stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to install CTRL+C handler");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
