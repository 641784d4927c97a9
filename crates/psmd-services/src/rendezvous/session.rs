//! Session lifecycle: Idle → Joining → Active → Leaving → Closed.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use psmd_core::{Topic, TopicId};

use super::event::DiscoveryEvent;
use crate::peer::{PeerDirectory, PeerRecord};

/// Session state. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Joining,
    Active,
    Leaving,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionState::Idle => "idle",
            SessionState::Joining => "joining",
            SessionState::Active => "active",
            SessionState::Leaving => "leaving",
            SessionState::Closed => "closed",
        })
    }
}

/// Topics with a live session, shared between a client and its sessions.
pub(crate) type ActiveTopics = Arc<DashMap<TopicId, ()>>;

/// State and event fan-out shared by a session handle and its task.
pub(crate) struct SessionShared {
    pub topic: TopicId,
    pub state: watch::Sender<SessionState>,
    pub events: broadcast::Sender<DiscoveryEvent>,
}

impl SessionShared {
    /// Move to `to` unless already there. Publishes `StateChanged`.
    pub fn transition(&self, to: SessionState) {
        let changed = self.state.send_if_modified(|s| {
            if *s == to || *s == SessionState::Closed {
                return false;
            }
            *s = to;
            true
        });
        if changed {
            self.announce_state(to);
        }
    }

    /// Move `from` → `to` only if currently in `from`.
    pub fn advance(&self, from: SessionState, to: SessionState) -> bool {
        let changed = self.state.send_if_modified(|s| {
            if *s != from {
                return false;
            }
            *s = to;
            true
        });
        if changed {
            self.announce_state(to);
        }
        changed
    }

    pub fn current(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn emit(&self, event: DiscoveryEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn announce_state(&self, state: SessionState) {
        tracing::info!(topic = %self.topic.short(), %state, "rendezvous session state");
        self.emit(DiscoveryEvent::StateChanged {
            topic: self.topic,
            state,
        });
    }
}

/// A joined topic. Dropping the handle stops the session without waiting.
pub struct RendezvousSession {
    pub(crate) topic: Topic,
    pub(crate) shared: Arc<SessionShared>,
    pub(crate) cancel: watch::Sender<bool>,
    pub(crate) task: Option<JoinHandle<()>>,
    pub(crate) shutdown_timeout: Duration,
    pub(crate) directory: PeerDirectory,
    pub(crate) active: ActiveTopics,
}

impl RendezvousSession {
    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    pub fn state(&self) -> SessionState {
        self.shared.current()
    }

    /// Watch state transitions.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    /// A fresh event receiver. Each subscription sees events published
    /// after it was created, in order.
    pub fn subscribe(&self) -> broadcast::Receiver<DiscoveryEvent> {
        self.shared.events.subscribe()
    }

    /// Peers currently known under this session's topic, freshest first.
    pub fn peers(&self) -> Vec<PeerRecord> {
        self.directory.list_active(&self.topic.id())
    }

    /// Read-only view for status reporting.
    pub fn monitor(&self) -> SessionMonitor {
        SessionMonitor {
            topic: self.topic.clone(),
            state: self.watch_state(),
        }
    }

    /// Wait until the session reaches `state`. Returns false if it closed
    /// first.
    pub async fn wait_for(&self, state: SessionState) -> bool {
        let mut rx = self.watch_state();
        let reached = rx
            .wait_for(|s| *s == state || *s == SessionState::Closed)
            .await
            .map(|s| *s == state)
            .unwrap_or(false);
        reached
    }

    /// Stop announcing and looking up, then close.
    ///
    /// Cooperative: the timer tasks stop at their next tick boundary. Calls
    /// already in flight get `shutdown_timeout` to settle before the task is
    /// aborted.
    pub async fn leave(mut self) -> SessionState {
        self.shutdown().await;
        self.state()
    }

    async fn shutdown(&mut self) {
        if self.state() == SessionState::Closed {
            return;
        }
        self.shared.transition(SessionState::Leaving);
        self.cancel.send_replace(true);

        // The handle stays in `self.task` while waiting so a dropped `leave`
        // future still aborts it in `Drop`.
        if let Some(task) = self.task.as_mut() {
            if tokio::time::timeout(self.shutdown_timeout, &mut *task)
                .await
                .is_err()
            {
                tracing::warn!(
                    topic = %self.topic.id().short(),
                    timeout = ?self.shutdown_timeout,
                    "in-flight transport calls did not settle, forcing close"
                );
                task.abort();
            }
        }
        self.task = None;
        self.close();
    }

    /// Final transition. Frees the topic exactly once.
    fn close(&self) {
        if self.shared.current() == SessionState::Closed {
            return;
        }
        self.shared.transition(SessionState::Closed);
        self.active.remove(&self.topic.id());
    }
}

impl Drop for RendezvousSession {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            self.cancel.send_replace(true);
            task.abort();
        }
        self.close();
    }
}

/// Cloneable read-only view of a session.
#[derive(Debug, Clone)]
pub struct SessionMonitor {
    topic: Topic,
    state: watch::Receiver<SessionState>,
}

impl SessionMonitor {
    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }
}
