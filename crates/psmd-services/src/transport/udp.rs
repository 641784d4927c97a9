//! UDP client for the psmd rendezvous server.
//!
//! One request is in flight at a time: the exchange lock serializes
//! announce and lookup so replies can be matched by request id on a
//! single connected socket. Replies to requests that already timed out
//! are skipped.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::sync::Mutex;

use psmd_core::wire::{Message, WirePeer, MAX_DATAGRAM};
use psmd_core::{PeerAddress, PeerId, TopicId};

use super::{Transport, TransportError};

pub struct UdpTransport {
    socket: UdpSocket,
    server: SocketAddr,
    local_peer: PeerId,
    advertise_port: u16,
    next_request: AtomicU32,
    exchange: Mutex<()>,
}

impl UdpTransport {
    /// Resolve `server` and connect a fresh socket to it.
    ///
    /// `advertise_port` is the port other peers should use; 0 lets the
    /// server take it from this socket's source port.
    pub async fn connect(server: &str, local_peer: PeerId, advertise_port: u16) -> Result<Self> {
        let server_addr = tokio::net::lookup_host(server)
            .await
            .with_context(|| format!("failed to resolve rendezvous server {server}"))?
            .next()
            .with_context(|| format!("rendezvous server {server} resolved to nothing"))?;

        let bind = if server_addr.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(bind)
            .await
            .context("failed to bind rendezvous client socket")?;
        socket
            .connect(server_addr)
            .await
            .with_context(|| format!("failed to connect to {server_addr}"))?;

        tracing::info!(
            server = %server_addr,
            local = %socket.local_addr()?,
            peer_id = %local_peer,
            "udp transport ready"
        );

        Ok(Self {
            socket,
            server: server_addr,
            local_peer,
            advertise_port,
            next_request: AtomicU32::new(1),
            exchange: Mutex::new(()),
        })
    }

    pub fn server(&self) -> SocketAddr {
        self.server
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    fn request_id(&self) -> u32 {
        self.next_request.fetch_add(1, Ordering::Relaxed)
    }

    /// Send one request and wait for the reply carrying its id.
    async fn request(&self, msg: Message) -> Result<Message, TransportError> {
        let bytes = msg
            .encode()
            .map_err(|e| TransportError::Malformed(e.to_string()))?;
        let want = msg.request_id();

        let _guard = self.exchange.lock().await;
        self.socket.send(&bytes).await?;

        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            let len = self.socket.recv(&mut buf).await?;
            let reply = match Message::decode(&buf[..len]) {
                Ok(reply) => reply,
                Err(e) => {
                    tracing::trace!(error = %e, "dropping undecodable reply");
                    continue;
                }
            };
            if reply.request_id() != want {
                tracing::trace!(got = reply.request_id(), want, "skipping stale reply");
                continue;
            }
            return Ok(reply);
        }
    }
}

/// Turn reply entries into lookup results. Entries with bad ids are dropped.
fn peers_from_wire(peers: Vec<WirePeer>) -> Vec<PeerAddress> {
    peers
        .into_iter()
        .filter_map(|p| match PeerId::from_hex(&p.peer_id) {
            Ok(peer_id) => Some(PeerAddress {
                peer_id,
                address: p.address,
            }),
            Err(e) => {
                tracing::debug!(error = %e, "dropping peer with bad id from lookup reply");
                None
            }
        })
        .collect()
}

#[async_trait]
impl Transport for UdpTransport {
    fn name(&self) -> &'static str {
        "udp"
    }

    /// Probe the server with a lookup on the zero topic.
    async fn bootstrap(&self) -> Result<(), TransportError> {
        self.lookup(&TopicId::ZERO).await.map(|_| ())
    }

    async fn announce(&self, topic: &TopicId) -> Result<(), TransportError> {
        let reply = self
            .request(Message::Announce {
                request_id: self.request_id(),
                topic: *topic,
                port: self.advertise_port,
                peer_id: self.local_peer.clone(),
            })
            .await?;

        match reply {
            Message::Ack { .. } => Ok(()),
            Message::Reject { reason, .. } => Err(TransportError::Rejected(reason)),
            other => Err(TransportError::Malformed(format!(
                "expected ack, got {:?}",
                other.kind()
            ))),
        }
    }

    async fn lookup(&self, topic: &TopicId) -> Result<Vec<PeerAddress>, TransportError> {
        let reply = self
            .request(Message::Lookup {
                request_id: self.request_id(),
                topic: *topic,
            })
            .await?;

        match reply {
            Message::Peers { peers, .. } => Ok(peers_from_wire(peers)),
            Message::Reject { reason, .. } => Err(TransportError::Rejected(reason)),
            other => Err(TransportError::Malformed(format!(
                "expected peers, got {:?}",
                other.kind()
            ))),
        }
    }
}
