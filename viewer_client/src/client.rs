//! Viewer client implementation.
//!
//! Owns the persistent backend connection and the per-connection state
//! machine `Disconnected → Connecting → Ready → Disconnected`. Commands are
//! only dispatched in `Ready`; anything arriving earlier is rejected and
//! logged, never retried. `server.restart` re-runs the handshake.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use viewer_shared::config::SessionConfig;
use viewer_shared::map::TownMap;
use viewer_shared::net::{cmd, Envelope, ViewerConn, PROTOCOL_VERSION};

use crate::dispatch::CommandDispatcher;
use crate::motion::{MotionDone, StepAnimator};
use crate::render::RenderAdapter;

/// Connection state. Commands are processed only in `Ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Disconnected,
    /// Handshake in flight; waiting for `server.welcome`.
    Connecting,
    Ready,
}

/// High-level viewer client.
pub struct ViewerClient {
    pub state: ConnState,
    conn: ViewerConn,
    dispatcher: CommandDispatcher,
    motion_rx: mpsc::UnboundedReceiver<MotionDone>,
    viewer_name: String,
}

impl ViewerClient {
    /// Connects to the backend and opens the handshake. The session config
    /// is read once here; the dispatcher never mutates it.
    pub async fn connect(
        cfg: &SessionConfig,
        town: Option<TownMap>,
        animator: Arc<dyn StepAnimator>,
        render: Box<dyn RenderAdapter>,
    ) -> anyhow::Result<Self> {
        let server_addr: SocketAddr = cfg.server_addr.parse().context("parse server_addr")?;

        info!(server = %server_addr, "Connecting to backend");
        let conn = ViewerConn::connect(server_addr).await?;

        let (motion_tx, motion_rx) = mpsc::unbounded_channel();
        let dispatcher = CommandDispatcher::new(cfg, town, animator, render, motion_tx);

        let viewer_name = cfg
            .player_name()
            .unwrap_or("viewer")
            .to_string();

        let mut client = Self {
            state: ConnState::Connecting,
            conn,
            dispatcher,
            motion_rx,
            viewer_name,
        };
        client.send_hello().await?;
        Ok(client)
    }

    /// Read-only view of the dispatcher (registry, clock).
    pub fn dispatcher(&self) -> &CommandDispatcher {
        &self.dispatcher
    }

    /// One cooperative poll step: waits for either an inbound envelope or a
    /// movement completion, whichever lands first, then processes it to
    /// completion. Call in a loop.
    pub async fn poll(&mut self, timeout: Duration) -> anyhow::Result<()> {
        tokio::select! {
            inbound = tokio::time::timeout(timeout, self.conn.recv()) => match inbound {
                Ok(Ok(env)) => self.handle_envelope(env).await?,
                Ok(Err(e)) => {
                    warn!(error = %e, "Connection error");
                    self.state = ConnState::Disconnected;
                }
                Err(_) => {
                    // Timeout, no message available.
                }
            },
            Some(done) = self.motion_rx.recv() => {
                self.dispatcher.handle_motion(done);
            }
        }
        Ok(())
    }

    async fn handle_envelope(&mut self, env: Envelope) -> anyhow::Result<()> {
        match (self.state, env.command.as_str()) {
            (ConnState::Connecting, cmd::SERVER_WELCOME) => {
                info!("Backend welcomed viewer; connection ready");
                self.state = ConnState::Ready;
            }
            (ConnState::Ready, cmd::SERVER_RESTART) => {
                info!("Backend restarting; re-running handshake");
                self.state = ConnState::Connecting;
                self.send_hello().await?;
            }
            (ConnState::Ready, _) => {
                let replies = self.dispatcher.handle_command(&env);
                for reply in replies {
                    self.conn.send(&reply).await?;
                }
            }
            (state, command) => {
                // Not ready yet: reject, log, do not retry.
                warn!(?state, %command, "Command rejected before ready");
            }
        }
        Ok(())
    }

    async fn send_hello(&mut self) -> anyhow::Result<()> {
        let hello = Envelope::new(
            cmd::VIEWER_HELLO,
            json!({
                "protocol": PROTOCOL_VERSION,
                "viewer": self.viewer_name,
            }),
        );
        self.conn.send(&hello).await?;
        debug!(viewer = %self.viewer_name, "Hello sent");
        Ok(())
    }

    /// One-line status summary for the console.
    pub fn status_lines(&self) -> Vec<String> {
        let mut out = Vec::new();
        out.push(format!("State: {:?}", self.state));
        out.push(format!("Step: {}", self.dispatcher.clock().step()));
        if let Ok(readout) = self.dispatcher.clock().readout() {
            out.push(format!("Game time: {} {}", readout.date, readout.time));
        }
        out.push(format!("Entities: {}", self.dispatcher.registry().len()));
        for entity in self.dispatcher.registry().iter() {
            out.push(format!(
                "  {} {} {} {}",
                entity.name(),
                entity.position,
                entity.direction,
                entity.status_glyph()
            ));
        }
        out
    }
}
