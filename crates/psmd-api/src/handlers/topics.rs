//! /topics and /peers/{topic} handlers.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use super::{parse_topic, ApiState};

// ── /topics ───────────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct TopicsResponse {
    pub topics: Vec<TopicInfo>,
}

#[derive(Serialize)]
pub struct TopicInfo {
    pub topic: String,
    /// Known only for topics this node joined.
    pub seed: Option<String>,
    pub peers: usize,
}

/// Joined topics first (even with no peers yet), then anything else the
/// directory holds.
pub async fn handle_topics(State(state): State<ApiState>) -> Json<TopicsResponse> {
    let mut topics: Vec<TopicInfo> = state
        .sessions
        .iter()
        .map(|s| TopicInfo {
            topic: s.topic().id().to_string(),
            seed: Some(s.topic().raw().to_string()),
            peers: state.directory.size_of(&s.topic().id()),
        })
        .collect();

    for (id, peers) in state.directory.topics() {
        if state.seed_of(&id).is_none() {
            topics.push(TopicInfo {
                topic: id.to_string(),
                seed: None,
                peers,
            });
        }
    }

    Json(TopicsResponse { topics })
}

// ── /peers/{topic} ────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct PeersResponse {
    pub topic: String,
    pub seed: Option<String>,
    pub peers: Vec<PeerInfo>,
}

#[derive(Serialize)]
pub struct PeerInfo {
    pub peer_id: String,
    pub address: String,
    pub first_seen_secs: u64,
    pub last_seen_secs: u64,
}

pub async fn handle_peers(
    State(state): State<ApiState>,
    Path(topic_hex): Path<String>,
) -> Result<Json<PeersResponse>, (StatusCode, String)> {
    let topic = parse_topic(&topic_hex)?;

    let peers = state
        .directory
        .list_active(&topic)
        .into_iter()
        .map(|r| PeerInfo {
            peer_id: r.peer_id.to_hex(),
            address: r.address,
            first_seen_secs: r.first_seen.elapsed().as_secs(),
            last_seen_secs: r.last_seen.elapsed().as_secs(),
        })
        .collect();

    Ok(Json(PeersResponse {
        topic: topic.to_string(),
        seed: state.seed_of(&topic),
        peers,
    }))
}
