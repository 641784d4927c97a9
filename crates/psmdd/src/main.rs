//! psmdd: psmd rendezvous daemon.
//!
//! `psmdd server` runs a rendezvous server. `psmdd` or `psmdd client` joins
//! every configured topic and keeps discovering peers until shutdown.

use anyhow::{Context, Result};
use tokio::sync::broadcast;

use psmd_core::config::PsmdConfig;

mod client;
mod server;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mode = std::env::args().nth(1).unwrap_or_else(|| "client".to_string());

    // Load config
    if let Err(e) = PsmdConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = PsmdConfig::load().context("invalid configuration")?;
    tracing::info!(mode, path = %PsmdConfig::file_path().display(), "psmdd starting");

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    match mode.as_str() {
        "server" => server::run(config, shutdown_tx).await,
        "client" => client::run(config, shutdown_tx).await,
        other => anyhow::bail!("unknown mode '{other}' (expected 'server' or 'client')"),
    }
}
