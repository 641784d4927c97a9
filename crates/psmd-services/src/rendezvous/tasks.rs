//! The session task: bootstrap, then two independent timer loops.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::{self, Instant, MissedTickBehavior};

use psmd_core::config::RendezvousSettings;
use psmd_core::{PeerAddress, PeerId, TopicId};

use super::event::{DegradedConnectivity, DiscoveryEvent};
use super::session::{SessionShared, SessionState};
use crate::peer::{PeerDirectory, PeerRecord, Upsert};
use crate::transport::{with_timeout, Operation, Transport, TransportError};

/// Everything the loops of one session need.
pub(crate) struct SessionContext<T> {
    pub transport: Arc<T>,
    pub directory: PeerDirectory,
    pub settings: RendezvousSettings,
    pub local_peer: Option<PeerId>,
    pub shared: Arc<SessionShared>,
}

impl<T> SessionContext<T> {
    fn topic(&self) -> TopicId {
        self.shared.topic
    }
}

/// Consecutive failures of one operation.
#[derive(Debug)]
pub(crate) struct FailureStreak {
    operation: Operation,
    threshold: u32,
    count: u32,
}

impl FailureStreak {
    pub fn new(operation: Operation, threshold: u32) -> Self {
        Self {
            operation,
            threshold,
            count: 0,
        }
    }

    /// Count a failure. Returns the streak length once it reaches the
    /// threshold, on that failure and every one after it.
    pub fn failed(&mut self) -> Option<u32> {
        self.count = self.count.saturating_add(1);
        (self.count >= self.threshold).then_some(self.count)
    }

    /// Reset after a success. Returns the streak that just ended.
    pub fn succeeded(&mut self) -> u32 {
        std::mem::take(&mut self.count)
    }
}

/// Whole session: Joining → Active, then announce and lookup until cancelled.
pub(crate) async fn run_session<T: Transport>(
    ctx: Arc<SessionContext<T>>,
    mut cancel: watch::Receiver<bool>,
) {
    let topic = ctx.topic();
    let bootstrap_timeout = ctx.settings.bootstrap_timeout();

    let ready = tokio::select! {
        biased;
        _ = cancel.wait_for(|c| *c) => return,
        r = time::timeout(bootstrap_timeout, ctx.transport.bootstrap()) => r,
    };

    match ready {
        Ok(Ok(())) => {
            tracing::debug!(topic = %topic.short(), transport = ctx.transport.name(), "transport ready");
        }
        Ok(Err(e)) => {
            tracing::warn!(
                topic = %topic.short(),
                error = %e,
                "transport bootstrap failed, continuing in degraded mode"
            );
        }
        Err(_) => {
            tracing::warn!(
                topic = %topic.short(),
                timeout = ?bootstrap_timeout,
                "no ready signal from transport, continuing in degraded mode"
            );
        }
    }

    if !ctx.shared.advance(SessionState::Joining, SessionState::Active) {
        return;
    }

    tokio::join!(
        announce_loop(ctx.clone(), cancel.clone()),
        lookup_loop(ctx.clone(), cancel),
    );
}

/// Wait for the next tick. False once the session is cancelled.
async fn next_tick(interval: &mut time::Interval, cancel: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        biased;
        _ = async { let _ = cancel.wait_for(|c| *c).await; } => false,
        _ = interval.tick() => true,
    }
}

fn timer(period: std::time::Duration) -> time::Interval {
    let mut interval = time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn announce_loop<T: Transport>(ctx: Arc<SessionContext<T>>, mut cancel: watch::Receiver<bool>) {
    let topic = ctx.topic();
    let mut interval = timer(ctx.settings.announce_interval());
    let mut streak = FailureStreak::new(Operation::Announce, ctx.settings.degraded_threshold);

    while next_tick(&mut interval, &mut cancel).await {
        let result = with_timeout(
            Operation::Announce,
            ctx.settings.call_timeout(),
            ctx.transport.announce(&topic),
        )
        .await;

        match result {
            Ok(()) => {
                let ended = streak.succeeded();
                if ended > 0 {
                    tracing::info!(topic = %topic.short(), failures = ended, "announce recovered");
                }
                tracing::trace!(topic = %topic.short(), "announced");
            }
            Err(e) => record_failure(&ctx, &mut streak, e),
        }
    }

    tracing::debug!(topic = %topic.short(), "announce loop stopped");
}

async fn lookup_loop<T: Transport>(ctx: Arc<SessionContext<T>>, mut cancel: watch::Receiver<bool>) {
    let topic = ctx.topic();
    let mut interval = timer(ctx.settings.lookup_interval());
    let mut streak = FailureStreak::new(Operation::Lookup, ctx.settings.degraded_threshold);
    let cap = ctx.settings.max_peers_per_topic;

    while next_tick(&mut interval, &mut cancel).await {
        if cap > 0 && ctx.directory.size_of(&topic) >= cap {
            tracing::trace!(topic = %topic.short(), cap, "peer cap reached, skipping lookup");
            continue;
        }

        let result = with_timeout(
            Operation::Lookup,
            ctx.settings.call_timeout(),
            ctx.transport.lookup(&topic),
        )
        .await;

        match result {
            Ok(peers) => {
                let ended = streak.succeeded();
                if ended > 0 {
                    tracing::info!(topic = %topic.short(), failures = ended, "lookup recovered");
                }
                absorb_lookup(&ctx, peers, Instant::now());
            }
            Err(e) => record_failure(&ctx, &mut streak, e),
        }
    }

    tracing::debug!(topic = %topic.short(), "lookup loop stopped");
}

fn record_failure<T>(ctx: &SessionContext<T>, streak: &mut FailureStreak, error: TransportError) {
    let topic = ctx.topic();
    tracing::warn!(
        topic = %topic.short(),
        operation = %streak.operation,
        error = %error,
        "transport call failed, retrying next tick"
    );

    if let Some(consecutive_failures) = streak.failed() {
        tracing::warn!(
            topic = %topic.short(),
            operation = %streak.operation,
            consecutive_failures,
            "connectivity degraded"
        );
        ctx.shared.emit(DiscoveryEvent::Degraded(DegradedConnectivity {
            topic,
            operation: streak.operation,
            consecutive_failures,
            last_error: error.to_string(),
        }));
    }
}

/// Drop our own entry and repeats of a peer id within one batch. First
/// occurrence wins; order is kept.
pub(crate) fn dedup_batch(peers: Vec<PeerAddress>, local_peer: Option<&PeerId>) -> Vec<PeerAddress> {
    let mut seen = HashSet::new();
    peers
        .into_iter()
        .filter(|p| Some(&p.peer_id) != local_peer)
        .filter(|p| seen.insert(p.peer_id.clone()))
        .collect()
}

/// Write one lookup batch into the directory, publishing first sightings.
fn absorb_lookup<T>(ctx: &SessionContext<T>, peers: Vec<PeerAddress>, now: Instant) {
    let topic = ctx.topic();
    let batch = dedup_batch(peers, ctx.local_peer.as_ref());

    for peer in batch {
        let record = PeerRecord::new(topic, peer, now);
        match ctx.directory.upsert(topic, record.clone()) {
            Ok(Upsert::Inserted) => {
                tracing::info!(
                    topic = %topic.short(),
                    peer = ?record.peer_id,
                    address = %record.address,
                    "peer discovered"
                );
                ctx.shared
                    .emit(DiscoveryEvent::PeerDiscovered { topic, record });
            }
            Ok(Upsert::Refreshed) => {
                tracing::trace!(topic = %topic.short(), peer = ?record.peer_id, "peer refreshed");
            }
            Err(e) => {
                tracing::debug!(topic = %topic.short(), error = %e, "dropping invalid lookup entry");
            }
        }
    }
}
