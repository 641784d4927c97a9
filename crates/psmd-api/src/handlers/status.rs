//! /status and /daemon/shutdown handlers.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use psmd_services::SessionState;

use super::ApiState;

// ── /status ──────────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct StatusResponse {
    pub role: String,
    pub peer_id: String,
    pub transport: String,
    pub uptime_secs: u64,
    pub sessions: Vec<SessionInfo>,
    pub peers_known: usize,
}

#[derive(Serialize)]
pub struct SessionInfo {
    pub seed: String,
    pub topic: String,
    pub state: SessionState,
    pub peers: usize,
}

pub async fn handle_status(State(state): State<ApiState>) -> Json<StatusResponse> {
    let sessions = state
        .sessions
        .iter()
        .map(|s| SessionInfo {
            seed: s.topic().raw().to_string(),
            topic: s.topic().id().to_string(),
            state: s.state(),
            peers: state.directory.size_of(&s.topic().id()),
        })
        .collect();

    Json(StatusResponse {
        role: state.role.to_string(),
        peer_id: state.peer_id.clone(),
        transport: state.transport.to_string(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        sessions,
        peers_known: state.directory.total(),
    })
}

// ── /daemon/shutdown ──────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct ShutdownResponse {
    pub message: String,
}

pub async fn handle_shutdown(State(state): State<ApiState>) -> Json<ShutdownResponse> {
    tracing::info!("shutdown requested via API");
    let _ = state.shutdown_tx.send(());

    Json(ShutdownResponse {
        message: "Shutdown initiated".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_support::*;
    use psmd_core::Topic;
    use psmd_services::PeerDirectory;

    #[tokio::test]
    async fn status_reports_sessions_and_counts() {
        let directory = PeerDirectory::new();
        let session = chat_session(directory.clone());
        let chat = Topic::derive("psmd/chat").unwrap();
        seed_peer(&directory, chat.id(), "nodeB", "10.0.0.2:1883");

        let Json(resp) = handle_status(State(state(vec![session.monitor()], directory))).await;
        assert_eq!(resp.role, "client");
        assert_eq!(resp.transport, "memory");
        assert_eq!(resp.peers_known, 1);
        assert_eq!(resp.sessions.len(), 1);
        assert_eq!(resp.sessions[0].seed, "psmd/chat");
        assert_eq!(resp.sessions[0].topic, chat.id().to_string());
        assert_eq!(resp.sessions[0].peers, 1);

        session.leave().await;
    }

    #[tokio::test]
    async fn status_state_serializes_lowercase() {
        let directory = PeerDirectory::new();
        let session = chat_session(directory.clone());
        let monitor = session.monitor();
        session.leave().await;

        let Json(resp) = handle_status(State(state(vec![monitor], directory))).await;
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["sessions"][0]["state"], "closed");
    }

    #[tokio::test]
    async fn shutdown_signals_subscribers() {
        let st = state(Vec::new(), PeerDirectory::new());
        let mut rx = st.shutdown_tx.subscribe();
        let Json(resp) = handle_shutdown(State(st)).await;
        assert_eq!(resp.message, "Shutdown initiated");
        assert!(rx.try_recv().is_ok());
    }
}
