//! psmd integration test harness.
//!
//! Everything runs in-process: a rendezvous server on a loopback UDP port
//! and clients talking to it through `UdpTransport`, or nodes sharing a
//! `MemoryNetwork`. Intervals are the smallest the config allows (1s), so
//! these tests take a few seconds each.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{bail, Result};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use psmd_core::config::RendezvousSettings;
use psmd_core::PeerId;
use psmd_services::{PeerDirectory, RendezvousClient, RendezvousServer, UdpTransport};

mod discovery;
mod failures;
mod lifecycle;

// ── Harness ───────────────────────────────────────────────────────────────────

/// A running loopback rendezvous server.
pub struct TestServer {
    pub addr: SocketAddr,
    pub directory: PeerDirectory,
    shutdown: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

impl TestServer {
    pub async fn start(peer_ttl: Duration) -> Result<Self> {
        let server = RendezvousServer::bind("127.0.0.1:0", peer_ttl).await?;
        let addr = server.local_addr()?;
        let directory = server.directory().clone();
        let (shutdown, rx) = broadcast::channel(1);
        let task = tokio::spawn(server.run(rx));
        Ok(Self {
            addr,
            directory,
            shutdown,
            task,
        })
    }

    pub async fn stop(self) {
        let _ = self.shutdown.send(());
        let _ = self.task.await;
    }
}

/// Settings with every interval at its minimum.
pub fn fast_settings() -> RendezvousSettings {
    RendezvousSettings {
        announce_interval: 1,
        lookup_interval: 1,
        peer_ttl: 30,
        bootstrap_timeout: 2,
        call_timeout: 1,
        shutdown_timeout: 2,
        sweep_interval: 1,
        degraded_threshold: 2,
        max_peers_per_topic: 0,
    }
}

/// A UDP client node announcing as `id`, with its own directory.
pub async fn udp_node(server: SocketAddr, id: &str) -> Result<RendezvousClient<UdpTransport>> {
    let peer_id = PeerId::from(id);
    let transport = UdpTransport::connect(&server.to_string(), peer_id.clone(), 0).await?;
    Ok(RendezvousClient::new(transport, PeerDirectory::new(), fast_settings())?.with_local_peer(peer_id))
}

/// Poll `check` every 100ms until it holds or `secs` pass.
pub async fn wait_for_condition(secs: u64, mut check: impl FnMut() -> bool) -> Result<()> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(secs);
    while tokio::time::Instant::now() < deadline {
        if check() {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    if check() {
        return Ok(());
    }
    bail!("condition not met within {secs}s")
}
