//! HTTP API handlers: exposes daemon state as JSON.

pub mod status;
pub mod topics;

use std::sync::Arc;

use axum::http::StatusCode;
use tokio::time::Instant;

use psmd_core::TopicId;
use psmd_services::{PeerDirectory, SessionMonitor};

#[derive(Clone)]
pub struct ApiState {
    pub directory: PeerDirectory,
    /// One per joined topic. Empty when running as a rendezvous server.
    pub sessions: Arc<Vec<SessionMonitor>>,
    /// "client" or "server".
    pub role: &'static str,
    /// Hex peer id, or empty for a server.
    pub peer_id: String,
    pub transport: &'static str,
    pub started_at: Instant,
    /// Signals graceful daemon shutdown.
    pub shutdown_tx: tokio::sync::broadcast::Sender<()>,
}

impl ApiState {
    /// Seed for a topic id, if one of our sessions joined it.
    fn seed_of(&self, topic: &TopicId) -> Option<String> {
        self.sessions
            .iter()
            .find(|s| s.topic().id() == *topic)
            .map(|s| s.topic().raw().to_string())
    }
}

/// Parse a hex-encoded 32-byte topic id.
fn parse_topic(hex_str: &str) -> Result<TopicId, (StatusCode, String)> {
    hex_str
        .parse()
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("bad topic: {e}")))
}
