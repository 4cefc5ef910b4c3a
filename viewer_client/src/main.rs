//! Standalone viewer binary.
//!
//! Usage:
//!   cargo run -p viewer_client -- [--addr 127.0.0.1:41000] [--config session.json] [--map-dir map]
//!
//! The viewer connects to the simulation backend, registers the configured
//! roster, and processes backend commands until disconnected.
//!
//! Console commands:
//!   status - Show connection state, game time, and entity positions
//!   quit   - Exit viewer

use std::env;
use std::io::{BufRead, Write};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::mpsc;
use tracing::{info, warn};

use viewer_client::client::{ConnState, ViewerClient};
use viewer_client::motion::TimedAnimator;
use viewer_client::render::TraceRenderAdapter;
use viewer_shared::config::SessionConfig;
use viewer_shared::map::TownMap;

struct Args {
    addr: Option<String>,
    config: Option<String>,
    map_dir: Option<String>,
}

fn parse_args() -> Args {
    let mut parsed = Args {
        addr: None,
        config: None,
        map_dir: None,
    };
    let args: Vec<String> = env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                parsed.addr = Some(args[i + 1].clone());
                i += 2;
            }
            "--config" if i + 1 < args.len() => {
                parsed.config = Some(args[i + 1].clone());
                i += 2;
            }
            "--map-dir" if i + 1 < args.len() => {
                parsed.map_dir = Some(args[i + 1].clone());
                i += 2;
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
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = parse_args();

    let mut cfg = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("read config {path}"))?;
            SessionConfig::from_json_str(&text).context("parse session config")?
        }
        None => SessionConfig::default(),
    };
    if let Some(addr) = args.addr {
        cfg.server_addr = addr;
    }
    if let Some(dir) = args.map_dir {
        cfg.map_dir = dir;
    }

    // Timing parameters are fatal at session start, not later.
    if cfg.sec_per_step.is_none() || cfg.start_datetime().is_none() {
        anyhow::bail!("session config must set sec_per_step, start_date, and start_time");
    }

    let town = match TownMap::load(&cfg.map_dir, &cfg.maze_name) {
        Ok(town) => Some(town),
        Err(e) => {
            warn!(error = %e, map_dir = %cfg.map_dir, "Town map unavailable; map queries will fail");
            None
        }
    };

    info!(server = %cfg.server_addr, roster = cfg.roster.len(), "Starting viewer");

    let mut client = ViewerClient::connect(
        &cfg,
        town,
        Arc::new(TimedAnimator::default()),
        Box::new(TraceRenderAdapter),
    )
    .await
    .context("connect")?;

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

    println!("Viewer connected. Type 'status' for info, 'quit' to exit.");
    println!();

    loop {
        // Process console commands.
        while let Ok(line) = console_rx.try_recv() {
            match line.as_str() {
                "status" => {
                    for line in client.status_lines() {
                        println!("{}", line);
                    }
                }
                "quit" | "exit" => {
                    return Ok(());
                }
                other => {
                    println!("Unknown command: {}", other);
                }
            }
        }

        client.poll(Duration::from_millis(50)).await?;

        if client.state == ConnState::Disconnected {
            println!("Disconnected from backend.");
            break;
        }
    }

    Ok(())
}
