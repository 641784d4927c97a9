//! In-process transport.
//!
//! `MemoryNetwork` is a shared rendezvous table; every `MemoryTransport`
//! made from it sees the same announcements. Failures and slow bootstrap
//! can be switched on per transport, which is what the session tests use.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;

use psmd_core::{PeerAddress, PeerId, TopicId};

use super::{Transport, TransportError};

/// Shared announcement table. Cloning shares the table.
#[derive(Debug, Clone, Default)]
pub struct MemoryNetwork {
    topics: Arc<DashMap<TopicId, Vec<PeerAddress>>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport that announces as `peer_id` at `address`.
    pub fn transport(&self, peer_id: impl Into<PeerId>, address: impl Into<String>) -> MemoryTransport {
        MemoryTransport {
            network: self.clone(),
            local: PeerAddress::new(peer_id, address),
            fail_announce: AtomicBool::new(false),
            fail_lookup: AtomicBool::new(false),
            bootstrap_delay: Mutex::new(Duration::ZERO),
            call_delay: Mutex::new(Duration::ZERO),
            scripted: Mutex::new(VecDeque::new()),
            announces: AtomicUsize::new(0),
            lookups: AtomicUsize::new(0),
        }
    }

    /// Register a peer directly, as if it had announced.
    pub fn insert(&self, topic: TopicId, peer: PeerAddress) {
        let mut peers = self.topics.entry(topic).or_default();
        match peers.iter_mut().find(|p| p.peer_id == peer.peer_id) {
            Some(existing) => existing.address = peer.address,
            None => peers.push(peer),
        }
    }

    /// Drop a peer from a topic.
    pub fn remove(&self, topic: &TopicId, peer_id: &PeerId) {
        if let Some(mut peers) = self.topics.get_mut(topic) {
            peers.retain(|p| &p.peer_id != peer_id);
        }
    }

    /// Everyone registered under a topic, in registration order.
    pub fn peers(&self, topic: &TopicId) -> Vec<PeerAddress> {
        self.topics.get(topic).map(|p| p.clone()).unwrap_or_default()
    }
}

/// One node's handle on a `MemoryNetwork`.
#[derive(Debug)]
pub struct MemoryTransport {
    network: MemoryNetwork,
    local: PeerAddress,
    fail_announce: AtomicBool,
    fail_lookup: AtomicBool,
    bootstrap_delay: Mutex<Duration>,
    call_delay: Mutex<Duration>,
    scripted: Mutex<VecDeque<Vec<PeerAddress>>>,
    announces: AtomicUsize,
    lookups: AtomicUsize,
}

impl MemoryTransport {
    pub fn local(&self) -> &PeerAddress {
        &self.local
    }

    /// Make every announce fail until switched off.
    pub fn fail_announce(&self, fail: bool) {
        self.fail_announce.store(fail, Ordering::Relaxed);
    }

    /// Make every lookup fail until switched off.
    pub fn fail_lookup(&self, fail: bool) {
        self.fail_lookup.store(fail, Ordering::Relaxed);
    }

    /// Delay before `bootstrap` reports ready.
    pub fn set_bootstrap_delay(&self, delay: Duration) {
        if let Ok(mut d) = self.bootstrap_delay.lock() {
            *d = delay;
        }
    }

    /// Delay every announce and lookup, as a slow network would.
    pub fn set_call_delay(&self, delay: Duration) {
        if let Ok(mut d) = self.call_delay.lock() {
            *d = delay;
        }
    }

    async fn stall(&self) {
        let delay = self.call_delay.lock().map(|d| *d).unwrap_or(Duration::ZERO);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    /// Queue a literal lookup result, returned by the next lookup in place
    /// of the network table.
    pub fn script_lookup(&self, peers: Vec<PeerAddress>) {
        if let Ok(mut q) = self.scripted.lock() {
            q.push_back(peers);
        }
    }

    /// Announce calls made so far, failed ones included.
    pub fn announce_calls(&self) -> usize {
        self.announces.load(Ordering::Relaxed)
    }

    /// Lookup calls made so far, failed ones included.
    pub fn lookup_calls(&self) -> usize {
        self.lookups.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn bootstrap(&self) -> Result<(), TransportError> {
        let delay = self
            .bootstrap_delay
            .lock()
            .map(|d| *d)
            .unwrap_or(Duration::ZERO);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    async fn announce(&self, topic: &TopicId) -> Result<(), TransportError> {
        self.announces.fetch_add(1, Ordering::Relaxed);
        self.stall().await;
        if self.fail_announce.load(Ordering::Relaxed) {
            return Err(TransportError::Unavailable("announce disabled".into()));
        }
        self.network.insert(*topic, self.local.clone());
        Ok(())
    }

    async fn lookup(&self, topic: &TopicId) -> Result<Vec<PeerAddress>, TransportError> {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        self.stall().await;
        if self.fail_lookup.load(Ordering::Relaxed) {
            return Err(TransportError::Unavailable("lookup disabled".into()));
        }
        let scripted = self.scripted.lock().ok().and_then(|mut q| q.pop_front());
        Ok(scripted.unwrap_or_else(|| self.network.peers(topic)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topic() -> TopicId {
        TopicId([1u8; 32])
    }

    #[tokio::test]
    async fn announce_is_visible_to_other_transports() {
        let net = MemoryNetwork::new();
        let a = net.transport("nodeA", "10.0.0.1:1883");
        let b = net.transport("nodeB", "10.0.0.2:1883");

        a.announce(&topic()).await.unwrap();
        b.announce(&topic()).await.unwrap();
        a.announce(&topic()).await.unwrap();

        let seen = b.lookup(&topic()).await.unwrap();
        assert_eq!(
            seen,
            vec![
                PeerAddress::new("nodeA", "10.0.0.1:1883"),
                PeerAddress::new("nodeB", "10.0.0.2:1883"),
            ]
        );
    }

    #[tokio::test]
    async fn injected_failures_are_reported_and_counted() {
        let net = MemoryNetwork::new();
        let a = net.transport("nodeA", "10.0.0.1:1883");
        a.fail_announce(true);
        a.fail_lookup(true);

        assert!(a.announce(&topic()).await.is_err());
        assert!(a.lookup(&topic()).await.is_err());
        assert_eq!(a.announce_calls(), 1);
        assert_eq!(a.lookup_calls(), 1);
        assert!(net.peers(&topic()).is_empty());
    }

    #[tokio::test]
    async fn scripted_lookup_takes_precedence_once() {
        let net = MemoryNetwork::new();
        net.insert(topic(), PeerAddress::new("real", "h:1"));
        let a = net.transport("nodeA", "h:0");
        a.script_lookup(vec![PeerAddress::new("fake", "h:9")]);

        assert_eq!(a.lookup(&topic()).await.unwrap()[0].peer_id, PeerId::from("fake"));
        assert_eq!(a.lookup(&topic()).await.unwrap()[0].peer_id, PeerId::from("real"));
    }

    #[test]
    fn remove_withdraws_peer() {
        let net = MemoryNetwork::new();
        net.insert(topic(), PeerAddress::new("a", "h:1"));
        net.remove(&topic(), &PeerId::from("a"));
        assert!(net.peers(&topic()).is_empty());
    }
}
