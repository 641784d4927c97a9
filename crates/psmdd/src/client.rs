//! Client mode: join the configured topics and log what turns up.

use std::net::Ipv4Addr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::Instant;

use psmd_api::ApiState;
use psmd_core::config::{PsmdConfig, TransportKind};
use psmd_core::{PeerId, Topic};
use psmd_services::{
    expiry_loop, DiscoveryEvent, LanTransport, PeerDirectory, RendezvousClient,
    RendezvousSession, Transport, UdpTransport,
};

pub async fn run(config: PsmdConfig, shutdown_tx: broadcast::Sender<()>) -> Result<()> {
    let peer_id = if config.identity.peer_id.is_empty() {
        PeerId::random()
    } else {
        PeerId::from_hex(&config.identity.peer_id).context("identity.peer_id must be hex")?
    };
    tracing::info!(%peer_id, "identity ready");

    let topics = config
        .topics
        .iter()
        .map(|seed| Topic::derive(seed).with_context(|| format!("bad topic seed {seed:?}")))
        .collect::<Result<Vec<_>>>()?;
    if topics.is_empty() {
        anyhow::bail!("no topics configured (set `topics` or PSMD_TOPICS)");
    }

    let port = config.identity.advertise_port;
    match config.transport.kind {
        TransportKind::Udp => {
            let transport = UdpTransport::connect(&config.transport.server, peer_id.clone(), port).await?;
            serve(transport, peer_id, topics, config, shutdown_tx).await
        }
        TransportKind::Lan => {
            let interface = match config.transport.lan_interface.as_str() {
                "" => Ipv4Addr::UNSPECIFIED,
                addr => addr
                    .parse()
                    .context("transport.lan_interface must be an IPv4 address")?,
            };
            let transport = LanTransport::bind(interface, peer_id.clone(), port)?;
            serve(transport, peer_id, topics, config, shutdown_tx).await
        }
    }
}

async fn serve<T: Transport>(
    transport: T,
    peer_id: PeerId,
    topics: Vec<Topic>,
    config: PsmdConfig,
    shutdown_tx: broadcast::Sender<()>,
) -> Result<()> {
    let directory = PeerDirectory::new();
    let settings = config.rendezvous.clone();
    let transport_name = transport.name();

    let client = RendezvousClient::new(transport, directory.clone(), settings.clone())?
        .with_local_peer(peer_id.clone());

    let mut sessions: Vec<RendezvousSession> = Vec::with_capacity(topics.len());
    for topic in &topics {
        sessions.push(client.join(topic)?);
    }

    // ── Spawn tasks ──────────────────────────────────────────────────────────

    for session in &sessions {
        tokio::spawn(log_events(
            session.topic().clone(),
            session.subscribe(),
            shutdown_tx.subscribe(),
        ));
    }

    let expiry_task = tokio::spawn(expiry_loop(
        directory.clone(),
        settings.peer_ttl(),
        settings.sweep_interval(),
        shutdown_tx.subscribe(),
    ));

    let api_state = ApiState {
        directory,
        sessions: Arc::new(sessions.iter().map(|s| s.monitor()).collect()),
        role: "client",
        peer_id: peer_id.to_hex(),
        transport: transport_name,
        started_at: Instant::now(),
        shutdown_tx: shutdown_tx.clone(),
    };
    let mut api_task = tokio::spawn(psmd_api::serve(api_state, config.api.port));

    // ── Wait for exit ────────────────────────────────────────────────────────

    let mut shutdown_rx = shutdown_tx.subscribe();
    tokio::select! {
        biased;
        _ = shutdown_rx.recv() => tracing::info!("shutting down"),
        r = &mut api_task      => tracing::error!("api task exited: {:?}", r),
    }
    let _ = shutdown_tx.send(());

    for session in sessions {
        let topic = session.topic().id();
        let state = session.leave().await;
        tracing::info!(topic = %topic.short(), %state, "left topic");
    }
    let _ = expiry_task.await;
    Ok(())
}

async fn log_events(
    topic: Topic,
    mut events: broadcast::Receiver<DiscoveryEvent>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        let event = tokio::select! {
            _ = shutdown.recv() => return,
            ev = events.recv() => ev,
        };
        match event {
            Ok(DiscoveryEvent::PeerDiscovered { record, .. }) => {
                tracing::info!(
                    seed = topic.raw(),
                    peer = %record.peer_id,
                    address = %record.address,
                    "peer discovered"
                );
            }
            Ok(DiscoveryEvent::Degraded(d)) => {
                tracing::warn!(
                    seed = topic.raw(),
                    operation = %d.operation,
                    consecutive_failures = d.consecutive_failures,
                    error = %d.last_error,
                    "degraded connectivity"
                );
            }
            Ok(DiscoveryEvent::StateChanged { .. }) => {}
            Err(RecvError::Lagged(n)) => {
                tracing::warn!(seed = topic.raw(), skipped = n, "event log fell behind");
            }
            Err(RecvError::Closed) => return,
        }
    }
}
