//! Peer directory: tracks peers discovered under each topic.
//!
//! A concurrent map from topic id to that topic's records. Writers for one
//! topic take that topic's entry lock, so upserts for a topic apply in the
//! order they arrive. Records leave the directory only through expiry.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::time::Instant;

use psmd_core::{InvalidInput, PeerAddress, PeerId, TopicId};

/// A peer seen under a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRecord {
    pub peer_id: PeerId,
    /// Where to reach the peer. May change across NAT rebindings.
    pub address: String,
    /// First sighting. Never changes once recorded.
    pub first_seen: Instant,
    /// Latest sighting. Drives ordering and expiry.
    pub last_seen: Instant,
    pub topic: TopicId,
}

impl PeerRecord {
    /// A record for a peer sighted at `seen_at`.
    pub fn new(topic: TopicId, peer: PeerAddress, seen_at: Instant) -> Self {
        Self {
            peer_id: peer.peer_id,
            address: peer.address,
            first_seen: seen_at,
            last_seen: seen_at,
            topic,
        }
    }

    /// Time since the last sighting.
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_seen)
    }
}

/// What an upsert did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    /// First sighting of this peer under the topic.
    Inserted,
    /// Existing record refreshed.
    Refreshed,
}

/// Caller-owned peer registry. Cloning shares the same underlying map.
#[derive(Debug, Clone, Default)]
pub struct PeerDirectory {
    topics: Arc<DashMap<TopicId, HashMap<PeerId, PeerRecord>>>,
}

impl PeerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or refresh a record.
    ///
    /// A refresh takes the new address and `last_seen` and keeps the
    /// original `first_seen`. Records with an empty id or address are
    /// rejected before anything is touched.
    pub fn upsert(&self, topic: TopicId, record: PeerRecord) -> Result<Upsert, InvalidInput> {
        if record.peer_id.is_empty() {
            return Err(InvalidInput::EmptyPeerId);
        }
        if record.address.is_empty() {
            return Err(InvalidInput::EmptyAddress);
        }

        let mut records = self.topics.entry(topic).or_default();
        match records.entry(record.peer_id.clone()) {
            Entry::Occupied(mut existing) => {
                let existing = existing.get_mut();
                existing.address = record.address;
                existing.last_seen = existing.last_seen.max(record.last_seen);
                Ok(Upsert::Refreshed)
            }
            Entry::Vacant(slot) => {
                slot.insert(PeerRecord { topic, ..record });
                Ok(Upsert::Inserted)
            }
        }
    }

    /// All records under a topic, most recently seen first.
    pub fn list_active(&self, topic: &TopicId) -> Vec<PeerRecord> {
        let mut out: Vec<PeerRecord> = self
            .topics
            .get(topic)
            .map(|records| records.values().cloned().collect())
            .unwrap_or_default();
        out.sort_by(|a, b| {
            b.last_seen
                .cmp(&a.last_seen)
                .then_with(|| a.peer_id.cmp(&b.peer_id))
        });
        out
    }

    /// Remove every record with `now - last_seen > ttl`. Returns how many
    /// were removed. Topics left empty are dropped.
    pub fn expire_older_than(&self, now: Instant, ttl: Duration) -> usize {
        let mut removed = 0;
        self.topics.retain(|_, records| {
            let before = records.len();
            records.retain(|_, r| r.age(now) <= ttl);
            removed += before - records.len();
            !records.is_empty()
        });
        removed
    }

    /// Number of records under a topic.
    pub fn size_of(&self, topic: &TopicId) -> usize {
        self.topics.get(topic).map(|r| r.len()).unwrap_or(0)
    }

    /// Topics with at least one record, with their record counts.
    pub fn topics(&self) -> Vec<(TopicId, usize)> {
        let mut out: Vec<(TopicId, usize)> = self
            .topics
            .iter()
            .map(|e| (*e.key(), e.value().len()))
            .collect();
        out.sort();
        out
    }

    /// Records across all topics.
    pub fn total(&self) -> usize {
        self.topics.iter().map(|e| e.value().len()).sum()
    }
}

/// Sweep expired records on a fixed cadence until shutdown.
pub async fn expiry_loop(
    directory: PeerDirectory,
    ttl: Duration,
    sweep_interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut interval = tokio::time::interval(sweep_interval);

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::debug!("peer expiry sweep stopping");
                return;
            }

            _ = interval.tick() => {
                let removed = directory.expire_older_than(Instant::now(), ttl);
                if removed > 0 {
                    tracing::debug!(removed, remaining = directory.total(), "expired peer records");
                }
            }
        }
    }
}
