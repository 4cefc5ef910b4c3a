//! Standalone stand-in backend binary.
//!
//! Usage:
//!   cargo run -p viewer_server -- [--addr 127.0.0.1:41000] [--config session.json] [--demo] [--tick-ms 1000]
//!
//! Listens for viewer connections and broadcasts typed commands. With
//! `--demo`, also emits one random walk order per tick interval.
//!
//! Console commands (comma-separated arguments):
//!   tick [n]                          Advance viewers n steps (default 1)
//!   snapshot                          Request a state snapshot (tick 0)
//!   navigate <name>, <dir>[, <speed>] Walk a character one tile
//!   emoji <name>, <emoji>             Set a character's emote
//!   chat <name>, <text>               Set a character's chat bubble
//!   town | npcs | npc <name> | player Query viewers
//!   restart                           Make viewers re-run the handshake
//!   status                            Show peer counts
//!   quit                              Shutdown
//!   {"command": ...}                  Raw envelope JSON

use std::env;
use std::io::{BufRead, Write};
use std::time::Duration;

use anyhow::Context;
use tokio::sync::mpsc;
use tracing::info;

use viewer_server::server::{parse_console_line, SimBackend};
use viewer_shared::config::SessionConfig;

struct Args {
    addr: String,
    config: Option<String>,
    demo: bool,
    tick_ms: u64,
}

fn parse_args() -> Args {
    let mut parsed = Args {
        addr: "127.0.0.1:41000".to_string(),
        config: None,
        demo: false,
        tick_ms: 1000,
    };
    let args: Vec<String> = env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                parsed.addr = args[i + 1].clone();
                i += 2;
            }
            "--config" if i + 1 < args.len() => {
                parsed.config = Some(args[i + 1].clone());
                i += 2;
            }
            "--tick-ms" if i + 1 < args.len() => {
                parsed.tick_ms = args[i + 1].parse().unwrap_or(1000);
                i += 2;
            }
            "--demo" => {
                parsed.demo = true;
                i += 1;
            }
            _ => i += 1,
        }
    }
    parsed
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = parse_args();

    let roster: Vec<String> = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("read config {path}"))?;
            let cfg = SessionConfig::from_json_str(&text).context("parse session config")?;
            cfg.roster.into_iter().map(|e| e.name).collect()
        }
        None => Vec::new(),
    };

    let mut backend = SimBackend::bind(args.addr.parse().context("parse addr")?, roster)
        .await
        .context("bind backend")?;
    let local = backend.local_addr()?;
    info!(%local, demo = args.demo, "Backend listening");

    // Set up console input channel.
    let (console_tx, mut console_rx) = mpsc::channel::<String>(32);

    // Spawn stdin reader thread.
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut stdout = std::io::stdout();
        loop {
            print!("] ");
            let _ = stdout.flush();
            let mut line = String::new();
            if stdin.lock().read_line(&mut line).is_err() {
                break;
            }
            let line = line.trim().to_string();
            if !line.is_empty() && console_tx.blocking_send(line).is_err() {
                break;
            }
        }
    });

    println!("Backend ready. Type 'navigate <name>, <dir>' to drive, 'quit' to exit.");
    println!();

    let tick_interval = Duration::from_millis(args.tick_ms);
    let mut next_tick = tokio::time::Instant::now() + tick_interval;

    loop {
        // Accept new viewers (non-blocking).
        backend.try_accept(Duration::from_millis(1)).await?;

        // Drain peer traffic (handshakes, ui.tick, responses).
        backend.poll_peers(Duration::from_millis(5)).await?;

        // Process console commands.
        while let Ok(line) = console_rx.try_recv() {
            match line.as_str() {
                "status" => {
                    println!(
                        "Peers: {} ({} ready), ticks sent: {}",
                        backend.peer_count(),
                        backend.ready_count(),
                        backend.ticks_sent()
                    );
                }
                "quit" | "exit" => {
                    info!("Backend shutting down");
                    return Ok(());
                }
                other => match parse_console_line(other) {
                    Ok(env) => backend.broadcast(&env).await?,
                    Err(e) => println!("{}", e),
                },
            }
        }

        // Demo driver beat.
        if args.demo && tokio::time::Instant::now() >= next_tick {
            backend.demo_step().await?;
            next_tick += tick_interval;
        }

        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
