//! psmd-ctl: command-line interface for the psmd daemon.

mod cmd;

use anyhow::{Context, Result};

const DEFAULT_PORT: u16 = 7421;

fn print_usage() {
    println!("Usage: psmd-ctl [--port <port>] <command>");
    println!();
    println!("Commands:");
    println!("  status          Show daemon status and joined topics");
    println!("  topics          List topics known to the daemon");
    println!("  peers <seed>    List peers discovered under a topic");
    println!("  topic <seed>    Print the topic id for a seed");
    println!("  shutdown        Stop the daemon");
    println!();
    println!("Options:");
    println!("  --port <port>   API port (default: {})", DEFAULT_PORT);
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    // Parse --port option
    let mut port = DEFAULT_PORT;
    let mut remaining: Vec<&str> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        if args[i] == "--port" {
            i += 1;
            port = args
                .get(i)
                .context("--port requires a value")?
                .parse()
                .context("--port must be a number")?;
        } else {
            remaining.push(&args[i]);
        }
        i += 1;
    }

    match remaining.as_slice() {
        ["status"] | [] => cmd::status::cmd_status(port).await,
        ["topics"] => cmd::topic::cmd_topics(port).await,
        ["peers", seed] => cmd::topic::cmd_peers(port, seed).await,
        ["topic", seed] => cmd::topic::cmd_topic(seed),
        ["shutdown"] => cmd::status::cmd_shutdown(port).await,
        ["help"] | ["--help"] | ["-h"] => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}
