//! Stand-in simulation backend.
//!
//! Not a simulation: a broadcast console. It accepts viewer connections,
//! answers the handshake, and forwards whatever the operator types (or the
//! demo driver generates) as protocol envelopes. Replies coming back from
//! viewers (`ui.tick`, `*.response`) are logged. The real backend owns all
//! simulation logic; this exists so the viewer can be driven end to end
//! without it.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use rand::seq::SliceRandom;
use serde_json::json;
use tracing::{debug, info, warn};

use viewer_shared::net::{
    cmd, Envelope, HelloData, ViewerConn, ViewerListener, RESPONSE_SUFFIX, PROTOCOL_VERSION,
};

/// One connected viewer.
struct Peer {
    conn: ViewerConn,
    addr: SocketAddr,
    /// Handshake finished; eligible for broadcasts.
    ready: bool,
}

/// Broadcast backend for driving viewers.
pub struct SimBackend {
    listener: ViewerListener,
    peers: Vec<Peer>,
    /// Names the demo driver may steer.
    roster: Vec<String>,
    ticks_sent: u64,
}

impl SimBackend {
    pub async fn bind(addr: SocketAddr, roster: Vec<String>) -> anyhow::Result<Self> {
        let listener = ViewerListener::bind(addr).await?;
        Ok(Self {
            listener,
            peers: Vec::new(),
            roster,
            ticks_sent: 0,
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn ready_count(&self) -> usize {
        self.peers.iter().filter(|p| p.ready).count()
    }

    pub fn ticks_sent(&self) -> u64 {
        self.ticks_sent
    }

    /// Accepts one pending connection, if any arrives within `timeout`.
    pub async fn try_accept(&mut self, timeout: Duration) -> anyhow::Result<Option<SocketAddr>> {
        match tokio::time::timeout(timeout, self.listener.accept()).await {
            Ok(Ok((conn, addr))) => {
                info!(%addr, "Viewer connected");
                self.peers.push(Peer {
                    conn,
                    addr,
                    ready: false,
                });
                Ok(Some(addr))
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Ok(None), // Timeout
        }
    }

    /// Drains inbound traffic from every peer: handshakes are answered,
    /// status/replies are logged, dead peers are dropped.
    pub async fn poll_peers(&mut self, per_peer_timeout: Duration) -> anyhow::Result<()> {
        let mut dead = Vec::new();

        for i in 0..self.peers.len() {
            match self.peers[i].conn.recv_timeout(per_peer_timeout).await {
                Ok(Some(env)) => {
                    if let Err(e) = Self::handle_peer_envelope(&mut self.peers[i], env).await {
                        warn!(addr = %self.peers[i].addr, error = %e, "Peer error");
                        dead.push(i);
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    info!(addr = %self.peers[i].addr, error = %e, "Viewer disconnected");
                    dead.push(i);
                }
            }
        }

        for i in dead.into_iter().rev() {
            self.peers.remove(i);
        }
        Ok(())
    }

    async fn handle_peer_envelope(peer: &mut Peer, env: Envelope) -> anyhow::Result<()> {
        match env.command.as_str() {
            cmd::VIEWER_HELLO => {
                let hello: HelloData = env
                    .payload()
                    .map_err(|e| anyhow::anyhow!("bad hello: {e}"))?;
                if hello.protocol != PROTOCOL_VERSION {
                    anyhow::bail!(
                        "protocol mismatch: viewer {} vs server {}",
                        hello.protocol,
                        PROTOCOL_VERSION
                    );
                }
                info!(addr = %peer.addr, viewer = %hello.viewer, "Handshake complete");
                peer.conn.send(&Envelope::bare(cmd::SERVER_WELCOME)).await?;
                peer.ready = true;
            }
            cmd::UI_TICK => {
                debug!(addr = %peer.addr, clock = %env.data["clock"]["time"], "ui.tick");
            }
            other if other.ends_with(RESPONSE_SUFFIX) => {
                info!(addr = %peer.addr, command = %other, "Response received");
            }
            other => {
                debug!(addr = %peer.addr, command = %other, "Unexpected peer message");
            }
        }
        Ok(())
    }

    /// Sends an envelope to every ready peer, dropping peers that fail.
    pub async fn broadcast(&mut self, env: &Envelope) -> anyhow::Result<()> {
        if env.command == cmd::SERVER_TICK {
            self.ticks_sent += 1;
        }

        let mut dead = Vec::new();
        for (i, peer) in self.peers.iter_mut().enumerate() {
            if !peer.ready {
                continue;
            }
            if let Err(e) = peer.conn.send(env).await {
                warn!(addr = %peer.addr, error = %e, "Broadcast failed; dropping peer");
                dead.push(i);
            }
        }
        for i in dead.into_iter().rev() {
            self.peers.remove(i);
        }
        Ok(())
    }

    /// One demo-driver beat: a tick carrying a random walk order for a
    /// random roster character.
    pub async fn demo_step(&mut self) -> anyhow::Result<()> {
        // ThreadRng is not Send; keep it out of the await below.
        let update = {
            let mut rng = rand::thread_rng();
            let name = self.roster.choose(&mut rng).cloned();
            let direction = ["left", "right", "up", "down"]
                .choose(&mut rng)
                .copied()
                .unwrap_or("down");
            name.map(|n| (n, direction))
        };

        let mut updates = serde_json::Map::new();
        if let Some((name, direction)) = update {
            updates.insert(
                name,
                json!({"activity": "move", "path": [direction]}),
            );
        }

        self.broadcast(&Envelope::new(
            cmd::SERVER_TICK,
            json!({"steps": 1, "updates": updates}),
        ))
        .await
    }
}

/// Binds to an ephemeral localhost port; for tests.
pub async fn bind_ephemeral(roster: Vec<String>) -> anyhow::Result<(SimBackend, SocketAddr)> {
    let backend = SimBackend::bind("127.0.0.1:0".parse().context("parse bind addr")?, roster).await?;
    let addr = backend.local_addr()?;
    Ok((backend, addr))
}

/// Parses one console line into an envelope to broadcast.
///
/// Raw JSON (`{"command": ...}`) passes through unchanged. Shorthands take
/// the verb first and comma-separated arguments after, so names with spaces
/// survive:
///   `tick [n]`
///   `snapshot`
///   `navigate <name>, <direction>[, <speed>]`
///   `emoji <name>, <emoji>`
///   `chat <name>, <text>`
///   `town` / `npcs` / `npc <name>` / `player`
///   `restart`
pub fn parse_console_line(line: &str) -> Result<Envelope, String> {
    let line = line.trim();

    if line.starts_with('{') {
        let env: Envelope =
            serde_json::from_str(line).map_err(|e| format!("bad envelope JSON: {e}"))?;
        return Ok(env);
    }

    let (verb, rest) = match line.split_once(' ') {
        Some((v, r)) => (v, r.trim()),
        None => (line, ""),
    };
    let args: Vec<&str> = if rest.is_empty() {
        Vec::new()
    } else {
        rest.split(',').map(str::trim).collect()
    };

    match verb {
        "tick" => {
            let steps: u32 = match args.first() {
                Some(s) => s.parse().map_err(|_| format!("bad step count '{s}'"))?,
                None => 1,
            };
            Ok(Envelope::new(cmd::SERVER_TICK, json!({"steps": steps})))
        }
        "snapshot" => Ok(Envelope::new(cmd::SERVER_TICK, json!({"steps": 0}))),
        "navigate" => {
            let [name, direction, restargs @ ..] = args.as_slice() else {
                return Err("usage: navigate <name>, <direction>[, <speed>]".to_string());
            };
            let speed: u32 = match restargs.first() {
                Some(s) => s.parse().map_err(|_| format!("bad speed '{s}'"))?,
                None => 1,
            };
            Ok(Envelope::new(
                cmd::NPC_NAVIGATE,
                json!({"npc_name": name, "direction": direction, "speed": speed}),
            ))
        }
        "emoji" => {
            let [name, emoji] = args.as_slice() else {
                return Err("usage: emoji <name>, <emoji>".to_string());
            };
            Ok(Envelope::new(
                cmd::NPC_EMOJI,
                json!({"npc_name": name, "emoji_text": emoji}),
            ))
        }
        "chat" => {
            let [name, text @ ..] = args.as_slice() else {
                return Err("usage: chat <name>, <text>".to_string());
            };
            Ok(Envelope::new(
                cmd::CHAT_UPDATE,
                json!({"npc_name": name, "text": text.join(", ")}),
            ))
        }
        "town" => Ok(Envelope::bare(cmd::MAP_GET_TOWN_DATA)),
        "npcs" => Ok(Envelope::bare(cmd::NPC_GET_LIST)),
        "npc" => {
            if args.is_empty() {
                return Err("usage: npc <name>".to_string());
            }
            Ok(Envelope::new(
                cmd::NPC_GET_INFO,
                json!({"npc_name": args.join(", ")}),
            ))
        }
        "player" => Ok(Envelope::bare(cmd::PLAYER_GET_INFO)),
        "restart" => Ok(Envelope::bare(cmd::SERVER_RESTART)),
        other => Err(format!("unknown console verb '{other}'")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn console_tick_shorthands() {
        let env = parse_console_line("tick 5").unwrap();
        assert_eq!(env.command, cmd::SERVER_TICK);
        assert_eq!(env.data["steps"], 5);

        let env = parse_console_line("tick").unwrap();
        assert_eq!(env.data["steps"], 1);

        let env = parse_console_line("snapshot").unwrap();
        assert_eq!(env.data["steps"], 0);
    }

    #[test]
    fn console_navigate_keeps_spaced_names() {
        let env = parse_console_line("navigate Maria Lopez, down, 2").unwrap();
        assert_eq!(env.command, cmd::NPC_NAVIGATE);
        assert_eq!(env.data["npc_name"], "Maria Lopez");
        assert_eq!(env.data["direction"], "down");
        assert_eq!(env.data["speed"], 2);
    }

    #[test]
    fn console_raw_json_passes_through() {
        let env = parse_console_line(r#"{"command": "npc.emoji", "data": {"npc_name": "Maria Lopez", "emoji_text": "🎉"}}"#)
            .unwrap();
        assert_eq!(env.command, cmd::NPC_EMOJI);
        assert_eq!(env.data["emoji_text"], "🎉");
    }

    #[test]
    fn console_rejects_unknown_verbs() {
        assert!(parse_console_line("fly Maria Lopez").is_err());
        assert!(parse_console_line("navigate Maria Lopez").is_err());
    }

    #[tokio::test]
    async fn demo_step_counts_ticks() -> anyhow::Result<()> {
        let (mut backend, _addr) = bind_ephemeral(vec!["Maria Lopez".to_string()]).await?;
        backend.demo_step().await?;
        backend.demo_step().await?;
        assert_eq!(backend.ticks_sent(), 2);
        Ok(())
    }
}
