//! Rendezvous server mode.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::broadcast;
use tokio::time::Instant;

use psmd_api::ApiState;
use psmd_core::config::PsmdConfig;
use psmd_services::RendezvousServer;

pub async fn run(config: PsmdConfig, shutdown_tx: broadcast::Sender<()>) -> Result<()> {
    let server = RendezvousServer::bind(&config.server.bind, config.server.peer_ttl())
        .await?
        .with_sweep_interval(config.server.sweep_interval());

    let api_state = ApiState {
        directory: server.directory().clone(),
        sessions: Arc::new(Vec::new()),
        role: "server",
        peer_id: String::new(),
        transport: "udp",
        started_at: Instant::now(),
        shutdown_tx: shutdown_tx.clone(),
    };

    let server_task = tokio::spawn(server.run(shutdown_tx.subscribe()));
    let api_task = tokio::spawn(psmd_api::serve(api_state, config.api.port));

    let mut shutdown_rx = shutdown_tx.subscribe();
    tokio::select! {
        biased;
        _ = shutdown_rx.recv() => tracing::info!("shutting down"),
        r = api_task           => tracing::error!("api task exited: {:?}", r),
    }

    let _ = shutdown_tx.send(());
    server_task.await?;
    Ok(())
}
