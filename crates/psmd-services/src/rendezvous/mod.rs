//! Rendezvous client: joins topics and keeps the peer directory filled.
//!
//! Each joined topic gets one session: a task that waits for the transport
//! to come up, then announces and looks up on two independent timers.
//! Lookup results land in the caller's `PeerDirectory`; first sightings,
//! state changes and sustained failures are published on the session's
//! event channel.

mod event;
mod session;
mod tasks;

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{broadcast, watch};

use psmd_core::config::{ConfigError, RendezvousSettings};
use psmd_core::{PeerId, Topic, TopicId};

use crate::peer::PeerDirectory;
use crate::transport::Transport;

pub use event::{DegradedConnectivity, DiscoveryEvent};
pub use session::{RendezvousSession, SessionMonitor, SessionState};

use session::{ActiveTopics, SessionShared};
use tasks::{run_session, SessionContext};

/// Buffered events per subscriber before the slowest one starts lagging.
const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JoinError {
    #[error("topic {0} already has an active session")]
    AlreadyJoined(TopicId),
}

/// Drives rendezvous sessions over one transport.
pub struct RendezvousClient<T: Transport> {
    transport: Arc<T>,
    directory: PeerDirectory,
    settings: RendezvousSettings,
    local_peer: Option<PeerId>,
    active: ActiveTopics,
}

impl<T: Transport> RendezvousClient<T> {
    /// Build a client. Invalid settings are rejected here, not at join time.
    pub fn new(
        transport: T,
        directory: PeerDirectory,
        settings: RendezvousSettings,
    ) -> Result<Self, ConfigError> {
        settings.validate()?;
        Ok(Self {
            transport: Arc::new(transport),
            directory,
            settings,
            local_peer: None,
            active: Arc::new(DashMap::new()),
        })
    }

    /// Our own peer id. Lookup results carrying it are ignored.
    pub fn with_local_peer(mut self, peer_id: PeerId) -> Self {
        self.local_peer = Some(peer_id);
        self
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    pub fn directory(&self) -> &PeerDirectory {
        &self.directory
    }

    pub fn settings(&self) -> &RendezvousSettings {
        &self.settings
    }

    /// Topics with a live session.
    pub fn active_topics(&self) -> Vec<TopicId> {
        self.active.iter().map(|e| *e.key()).collect()
    }

    /// Start a session for `topic`. Must be called inside a tokio runtime.
    ///
    /// The returned session is already `Joining`; it turns `Active` once the
    /// transport reports ready or `bootstrap_timeout` passes.
    pub fn join(&self, topic: &Topic) -> Result<RendezvousSession, JoinError> {
        let id = topic.id();
        if self.active.insert(id, ()).is_some() {
            return Err(JoinError::AlreadyJoined(id));
        }

        let (state, _) = watch::channel(SessionState::Idle);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let shared = Arc::new(SessionShared {
            topic: id,
            state,
            events,
        });
        let (cancel, cancel_rx) = watch::channel(false);

        tracing::info!(
            seed = topic.raw(),
            topic = %id,
            transport = self.transport.name(),
            "joining topic"
        );
        shared.transition(SessionState::Joining);

        let ctx = Arc::new(SessionContext {
            transport: self.transport.clone(),
            directory: self.directory.clone(),
            settings: self.settings.clone(),
            local_peer: self.local_peer.clone(),
            shared: shared.clone(),
        });
        let task = tokio::spawn(run_session(ctx, cancel_rx));

        Ok(RendezvousSession {
            topic: topic.clone(),
            shared,
            cancel,
            task: Some(task),
            shutdown_timeout: self.settings.shutdown_timeout(),
            directory: self.directory.clone(),
            active: self.active.clone(),
        })
    }
}
