//! Daemon status and shutdown commands.

use anyhow::Result;
use serde::Deserialize;

use super::http::{base_url, get_json, post_json};

// ── Response types ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct StatusResponse {
    role: String,
    peer_id: String,
    transport: String,
    uptime_secs: u64,
    sessions: Vec<SessionInfo>,
    peers_known: usize,
}

#[derive(Deserialize)]
struct SessionInfo {
    seed: String,
    topic: String,
    state: String,
    peers: usize,
}

// ── Commands ──────────────────────────────────────────────────────────────────

pub async fn cmd_status(port: u16) -> Result<()> {
    let resp: StatusResponse = get_json(&format!("{}/status", base_url(port))).await?;

    println!("═══════════════════════════════════════");
    println!("  psmd Daemon Status");
    println!("═══════════════════════════════════════");
    println!("  Role        : {}", resp.role);
    if !resp.peer_id.is_empty() {
        println!("  Peer id     : {}", resp.peer_id);
    }
    println!("  Transport   : {}", resp.transport);
    println!("  Uptime      : {}s", resp.uptime_secs);
    println!("  Peers known : {}", resp.peers_known);

    if resp.sessions.is_empty() {
        println!("\n  No joined topics.");
    } else {
        println!("\n  Sessions:");
        for s in &resp.sessions {
            println!("  ┌─ {}", s.seed);
            println!("  │  topic : {}", s.topic.get(..16).unwrap_or(&s.topic));
            println!("  │  state : {}", s.state);
            println!("  └─ peers : {}", s.peers);
        }
    }

    Ok(())
}

pub async fn cmd_shutdown(port: u16) -> Result<()> {
    #[derive(Deserialize)]
    struct ShutdownResponse {
        message: String,
    }

    let resp: ShutdownResponse = post_json(&format!("{}/daemon/shutdown", base_url(port))).await?;
    println!("{}", resp.message);
    Ok(())
}
