//! Events a session publishes to its subscribers.

use psmd_core::TopicId;

use super::session::SessionState;
use crate::peer::PeerRecord;
use crate::transport::Operation;

/// One thing that happened in a session.
#[derive(Debug, Clone)]
pub enum DiscoveryEvent {
    /// The session moved to a new state.
    StateChanged { topic: TopicId, state: SessionState },

    /// A peer was seen under the topic for the first time.
    PeerDiscovered { topic: TopicId, record: PeerRecord },

    /// An operation has failed repeatedly. Advisory: the session keeps
    /// retrying.
    Degraded(DegradedConnectivity),
}

/// Sustained failure of one transport operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DegradedConnectivity {
    pub topic: TopicId,
    pub operation: Operation,
    pub consecutive_failures: u32,
    pub last_error: String,
}

impl DiscoveryEvent {
    pub fn topic(&self) -> TopicId {
        match self {
            DiscoveryEvent::StateChanged { topic, .. }
            | DiscoveryEvent::PeerDiscovered { topic, .. } => *topic,
            DiscoveryEvent::Degraded(d) => d.topic,
        }
    }
}
