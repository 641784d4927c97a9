//! LAN presence beacons over IPv4 multicast.
//!
//! `announce` sends an Announce datagram to the multicast group. A
//! background receiver collects beacons from other nodes into a per-topic
//! buffer, and `lookup` drains that buffer. Beacons never leave the link
//! (multicast TTL 1).

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

use psmd_core::wire::{Message, LAN_MULTICAST_ADDR, LAN_PORT, MAX_DATAGRAM};
use psmd_core::{PeerAddress, PeerId, TopicId};

use super::{Transport, TransportError};

/// Beacons heard since the last lookup, per topic.
type Heard = Arc<DashMap<TopicId, Vec<PeerAddress>>>;

pub struct LanTransport {
    socket: Arc<UdpSocket>,
    group: SocketAddrV4,
    local_peer: PeerId,
    advertise_port: u16,
    heard: Heard,
    next_request: AtomicU32,
    receiver: JoinHandle<()>,
}

impl LanTransport {
    /// Join the beacon group on `interface` (UNSPECIFIED = let the OS pick)
    /// and start listening.
    pub fn bind(interface: Ipv4Addr, local_peer: PeerId, advertise_port: u16) -> Result<Self> {
        let group_ip: Ipv4Addr = LAN_MULTICAST_ADDR
            .parse()
            .context("bad LAN multicast address")?;
        let socket = make_multicast_socket(group_ip, interface)
            .context("failed to create LAN beacon socket")?;
        let socket =
            Arc::new(UdpSocket::from_std(socket).context("failed to convert to tokio UdpSocket")?);

        let heard: Heard = Arc::new(DashMap::new());
        let receiver = tokio::spawn(receive_loop(
            socket.clone(),
            heard.clone(),
            local_peer.clone(),
        ));

        tracing::info!(
            group = %group_ip,
            port = LAN_PORT,
            interface = %interface,
            "lan transport listening"
        );

        Ok(Self {
            socket,
            group: SocketAddrV4::new(group_ip, LAN_PORT),
            local_peer,
            advertise_port,
            heard,
            next_request: AtomicU32::new(1),
            receiver,
        })
    }
}

impl Drop for LanTransport {
    fn drop(&mut self) {
        self.receiver.abort();
    }
}

#[async_trait]
impl Transport for LanTransport {
    fn name(&self) -> &'static str {
        "lan"
    }

    async fn announce(&self, topic: &TopicId) -> Result<(), TransportError> {
        let beacon = Message::Announce {
            request_id: self.next_request.fetch_add(1, Ordering::Relaxed),
            topic: *topic,
            port: self.advertise_port,
            peer_id: self.local_peer.clone(),
        }
        .encode()
        .map_err(|e| TransportError::Malformed(e.to_string()))?;

        let n = self.socket.send_to(&beacon, self.group).await?;
        tracing::trace!(bytes = n, topic = %topic.short(), "beacon sent");
        Ok(())
    }

    async fn lookup(&self, topic: &TopicId) -> Result<Vec<PeerAddress>, TransportError> {
        Ok(self
            .heard
            .remove(topic)
            .map(|(_, peers)| peers)
            .unwrap_or_default())
    }
}

const RECV_BACKOFF: Duration = Duration::from_millis(100);
const MAX_RECV_ERRORS: u32 = 50;

/// Pacing for consecutive receive errors.
#[derive(Debug, Default)]
struct RecvBackoff {
    failures: u32,
}

impl RecvBackoff {
    /// Delay before the next attempt, or `None` once the socket looks dead.
    fn failed(&mut self) -> Option<Duration> {
        self.failures += 1;
        (self.failures < MAX_RECV_ERRORS).then_some(RECV_BACKOFF)
    }

    fn reset(&mut self) {
        self.failures = 0;
    }
}

/// Collect beacons until the socket fails or the task is aborted.
async fn receive_loop(socket: Arc<UdpSocket>, heard: Heard, local_peer: PeerId) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    let mut backoff = RecvBackoff::default();

    loop {
        let (len, from) = match socket.recv_from(&mut buf).await {
            Ok(r) => r,
            Err(e) => match backoff.failed() {
                Some(delay) => {
                    tracing::warn!(error = %e, "beacon recv_from failed");
                    tokio::time::sleep(delay).await;
                    continue;
                }
                None => {
                    tracing::error!(error = %e, "beacon socket keeps failing, receiver stopped");
                    return;
                }
            },
        };
        backoff.reset();

        match Message::decode(&buf[..len]) {
            Ok(msg) => record_beacon(&heard, &local_peer, msg, from),
            Err(e) => tracing::trace!(error = %e, from = %from, "ignoring non-beacon datagram"),
        }
    }
}

/// File one decoded beacon. Our own beacons and non-announce kinds are ignored.
fn record_beacon(heard: &Heard, local_peer: &PeerId, msg: Message, from: SocketAddr) {
    let Message::Announce {
        topic,
        port,
        peer_id,
        ..
    } = msg
    else {
        return;
    };

    if &peer_id == local_peer {
        tracing::trace!("ignoring own beacon");
        return;
    }

    let port = if port == 0 { from.port() } else { port };
    let address = SocketAddr::new(from.ip(), port).to_string();
    tracing::debug!(topic = %topic.short(), peer = %peer_id, %address, "beacon heard");

    let mut peers = heard.entry(topic).or_default();
    match peers.iter_mut().find(|p| p.peer_id == peer_id) {
        Some(existing) => existing.address = address,
        None => peers.push(PeerAddress { peer_id, address }),
    }
}

/// Create a UDP socket joined to the beacon group.
fn make_multicast_socket(group: Ipv4Addr, interface: Ipv4Addr) -> Result<std::net::UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).context("socket()")?;

    socket.set_reuse_address(true).context("SO_REUSEADDR")?;
    socket.set_nonblocking(true).context("set_nonblocking")?;

    let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, LAN_PORT);
    socket.bind(&bind_addr.into()).context("bind()")?;

    socket
        .join_multicast_v4(&group, &interface)
        .context("IP_ADD_MEMBERSHIP")?;
    socket.set_multicast_loop_v4(true).context("IP_MULTICAST_LOOP")?;
    // TTL 1: stay on this link
    socket.set_multicast_ttl_v4(1).context("IP_MULTICAST_TTL")?;

    Ok(socket.into())
}
