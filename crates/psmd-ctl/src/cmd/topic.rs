//! Topic listing, per-topic peers, and local topic derivation.

use anyhow::{Context, Result};
use serde::Deserialize;

use psmd_core::Topic;

use super::http::{base_url, get_json};

// ── Response types ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct TopicsResponse {
    topics: Vec<TopicInfo>,
}

#[derive(Deserialize)]
struct TopicInfo {
    topic: String,
    seed: Option<String>,
    peers: usize,
}

#[derive(Deserialize)]
struct PeersResponse {
    topic: String,
    peers: Vec<PeerInfo>,
}

#[derive(Deserialize)]
struct PeerInfo {
    peer_id: String,
    address: String,
    first_seen_secs: u64,
    last_seen_secs: u64,
}

// ── Commands ──────────────────────────────────────────────────────────────────

pub async fn cmd_topics(port: u16) -> Result<()> {
    let resp: TopicsResponse = get_json(&format!("{}/topics", base_url(port))).await?;

    if resp.topics.is_empty() {
        println!("No topics.");
        return Ok(());
    }

    for t in &resp.topics {
        println!(
            "{}  {:>4} peers  {}",
            t.topic,
            t.peers,
            t.seed.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

pub async fn cmd_peers(port: u16, seed: &str) -> Result<()> {
    let topic = derive(seed)?;
    let resp: PeersResponse =
        get_json(&format!("{}/peers/{}", base_url(port), topic.id())).await?;

    if resp.peers.is_empty() {
        println!("No peers under {} yet.", seed);
        return Ok(());
    }

    println!("═══════════════════════════════════════");
    println!("  Peers for {} ({})", seed, resp.peers.len());
    println!("  {}", resp.topic);
    println!("═══════════════════════════════════════");
    for p in &resp.peers {
        println!("  {}", peer_line(p));
    }
    Ok(())
}

/// Print the topic id for a seed. Needs no daemon.
pub fn cmd_topic(seed: &str) -> Result<()> {
    println!("{}", derive(seed)?.id());
    Ok(())
}

fn derive(seed: &str) -> Result<Topic> {
    Topic::derive(seed).with_context(|| format!("cannot derive topic from {:?}", seed))
}

fn short(hex_id: &str) -> &str {
    hex_id.get(..16).unwrap_or(hex_id)
}

fn peer_line(p: &PeerInfo) -> String {
    format!(
        "{:<24} {}  (known {}s, seen {}s ago)",
        p.address,
        short(&p.peer_id),
        p.first_seen_secs,
        p.last_seen_secs
    )
}
