//! UDP rendezvous server.
//!
//! Keeps its own `PeerDirectory` of announcements. `Announce` refreshes the
//! sender's record and is answered with `Ack`; `Lookup` is answered with the
//! freshest peers under the topic. Anything that does not decode is dropped.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tokio::time::{Instant, MissedTickBehavior};

use psmd_core::wire::{Message, WirePeer, MAX_DATAGRAM};
use psmd_core::PeerAddress;

use crate::peer::{PeerDirectory, PeerRecord, Upsert};

const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

pub struct RendezvousServer {
    socket: UdpSocket,
    directory: PeerDirectory,
    peer_ttl: Duration,
    sweep_interval: Duration,
}

impl RendezvousServer {
    pub async fn bind(addr: &str, peer_ttl: Duration) -> Result<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .with_context(|| format!("failed to bind rendezvous server on {addr}"))?;
        tracing::info!(addr = %socket.local_addr()?, ttl = ?peer_ttl, "rendezvous server listening");
        Ok(Self {
            socket,
            directory: PeerDirectory::new(),
            peer_ttl,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        })
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// The announcement table. Cloning shares it.
    pub fn directory(&self) -> &PeerDirectory {
        &self.directory
    }

    /// Serve until shutdown.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let mut sweep = tokio::time::interval(self.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!(peers = self.directory.total(), "rendezvous server stopping");
                    return;
                }

                _ = sweep.tick() => {
                    let removed = self.directory.expire_older_than(Instant::now(), self.peer_ttl);
                    if removed > 0 {
                        tracing::debug!(removed, "expired announcements");
                    }
                }

                recv = self.socket.recv_from(&mut buf) => {
                    let (len, from) = match recv {
                        Ok(r) => r,
                        Err(e) => {
                            tracing::warn!(error = %e, "recv_from failed");
                            continue;
                        }
                    };
                    let Some(reply) = self.handle(&buf[..len], from) else {
                        continue;
                    };
                    match reply.encode() {
                        Ok(bytes) => {
                            if let Err(e) = self.socket.send_to(&bytes, from).await {
                                tracing::debug!(%from, error = %e, "reply send failed");
                            }
                        }
                        Err(e) => tracing::warn!(%from, error = %e, "failed to encode reply"),
                    }
                }
            }
        }
    }

    /// Process one datagram. Returns the reply to send, if any.
    pub fn handle(&self, bytes: &[u8], from: SocketAddr) -> Option<Message> {
        let msg = match Message::decode(bytes) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::trace!(%from, error = %e, "dropping datagram");
                return None;
            }
        };

        match msg {
            Message::Announce {
                request_id,
                topic,
                port,
                peer_id,
            } => {
                let port = if port == 0 { from.port() } else { port };
                let address = SocketAddr::new(from.ip(), port).to_string();
                let record = PeerRecord::new(topic, PeerAddress { peer_id, address }, Instant::now());
                let peer = record.peer_id.clone();

                match self.directory.upsert(topic, record) {
                    Ok(outcome) => {
                        if outcome == Upsert::Inserted {
                            tracing::info!(topic = %topic.short(), %peer, %from, "peer announced");
                        }
                        Some(Message::Ack { request_id, topic })
                    }
                    Err(e) => Some(Message::Reject {
                        request_id,
                        topic,
                        reason: e.to_string(),
                    }),
                }
            }

            Message::Lookup { request_id, topic } => {
                let candidates = self
                    .directory
                    .list_active(&topic)
                    .into_iter()
                    .map(|r| WirePeer {
                        peer_id: r.peer_id.to_hex(),
                        address: r.address,
                    })
                    .collect();
                Some(Message::peers_reply(request_id, topic, candidates))
            }

            other => {
                tracing::trace!(%from, kind = ?other.kind(), "ignoring reply-kind datagram");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use psmd_core::{PeerId, TopicId};

    async fn server() -> RendezvousServer {
        RendezvousServer::bind("127.0.0.1:0", Duration::from_secs(600))
            .await
            .unwrap()
    }

    fn from(port: u16) -> SocketAddr {
        SocketAddr::from(([10, 0, 0, 2], port))
    }

    fn announce(id: &str, port: u16) -> Vec<u8> {
        Message::Announce {
            request_id: 9,
            topic: TopicId([5u8; 32]),
            port,
            peer_id: PeerId::from(id),
        }
        .encode()
        .unwrap()
    }

    fn lookup() -> Vec<u8> {
        Message::Lookup {
            request_id: 10,
            topic: TopicId([5u8; 32]),
        }
        .encode()
        .unwrap()
    }

    #[tokio::test]
    async fn announce_is_acked_and_listed() {
        let server = server().await;
        let reply = server.handle(&announce("nodeB", 1883), from(40000));
        assert_eq!(
            reply,
            Some(Message::Ack {
                request_id: 9,
                topic: TopicId([5u8; 32])
            })
        );

        match server.handle(&lookup(), from(40001)) {
            Some(Message::Peers { request_id, peers, .. }) => {
                assert_eq!(request_id, 10);
                assert_eq!(
                    peers,
                    vec![WirePeer {
                        peer_id: PeerId::from("nodeB").to_hex(),
                        address: "10.0.0.2:1883".into(),
                    }]
                );
            }
            other => panic!("expected peers, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn port_zero_uses_source_port() {
        let server = server().await;
        server.handle(&announce("nodeB", 0), from(40000));
        let peers = server.directory().list_active(&TopicId([5u8; 32]));
        assert_eq!(peers[0].address, "10.0.0.2:40000");
    }

    #[tokio::test]
    async fn reannounce_refreshes_instead_of_duplicating() {
        let server = server().await;
        server.handle(&announce("nodeB", 1883), from(40000));
        server.handle(&announce("nodeB", 1884), from(40000));
        let peers = server.directory().list_active(&TopicId([5u8; 32]));
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].address, "10.0.0.2:1884");
    }

    #[tokio::test]
    async fn lookup_on_unknown_topic_is_empty() {
        let server = server().await;
        match server.handle(&lookup(), from(40000)) {
            Some(Message::Peers { peers, .. }) => assert!(peers.is_empty()),
            other => panic!("expected peers, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn garbage_and_replies_are_ignored() {
        let server = server().await;
        assert_eq!(server.handle(b"hello", from(1)), None);

        let ack = Message::Ack {
            request_id: 1,
            topic: TopicId::ZERO,
        }
        .encode()
        .unwrap();
        assert_eq!(server.handle(&ack, from(1)), None);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_follows_configured_interval() {
        let server = RendezvousServer::bind("127.0.0.1:0", Duration::from_secs(1))
            .await
            .unwrap()
            .with_sweep_interval(Duration::from_secs(30));
        server.handle(&announce("nodeB", 1883), from(40000));
        let directory = server.directory().clone();
        let (tx, rx) = broadcast::channel(1);
        let handle = tokio::spawn(server.run(rx));

        // Stale after 1s, but the next sweep is not due until 30s.
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(directory.total(), 1);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(directory.total(), 0);

        tx.send(()).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn serves_over_loopback_until_shutdown() {
        let server = server().await;
        let addr = server.local_addr().unwrap();
        let (tx, rx) = broadcast::channel(1);
        let handle = tokio::spawn(server.run(rx));

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(&announce("nodeB", 0), addr).await.unwrap();
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let (len, _) = client.recv_from(&mut buf).await.unwrap();
        assert!(matches!(Message::decode(&buf[..len]), Ok(Message::Ack { .. })));

        tx.send(()).unwrap();
        handle.await.unwrap();
    }
}
