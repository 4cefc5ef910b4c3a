//! Wire protocol.
//!
//! Framing is length-prefixed JSON text over a persistent TCP stream: a
//! big-endian `u32` length followed by one UTF-8 JSON envelope. Every
//! envelope is `{"command": <string>, "data": <json>}`; `data` may itself be
//! a JSON-encoded string (the backend double-encodes some payloads), which
//! [`Envelope::payload`] transparently unwraps.
//!
//! The command vocabulary never fully stabilized upstream; the constants in
//! [`cmd`] are the most complete variant observed and are the single place
//! the spellings live.

use anyhow::Context;
use bytes::{BufMut, BytesMut};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::net::SocketAddr;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    time,
};

use crate::error::ViewerError;
use crate::grid::Direction;

/// Protocol version for compatibility checks.
pub const PROTOCOL_VERSION: u32 = 1;

/// Upper bound on a single frame; anything larger is a corrupt stream.
pub const MAX_FRAME_LEN: usize = 4 * 1024 * 1024;

/// Command name constants.
pub mod cmd {
    // ─── Handshake / lifecycle ───
    pub const VIEWER_HELLO: &str = "viewer.hello";
    pub const SERVER_WELCOME: &str = "server.welcome";
    pub const SERVER_RESTART: &str = "server.restart";

    // ─── Simulation drive (server → viewer) ───
    pub const SERVER_TICK: &str = "server.tick";
    pub const NPC_NAVIGATE: &str = "npc.navigate";
    pub const NPC_SET_ACTIVITY: &str = "npc.setActivity";
    pub const NPC_EMOJI: &str = "npc.emoji";
    pub const CHAT_UPDATE: &str = "chat.update";
    pub const USER_NAVIGATE: &str = "command.map.UserNavigate";
    pub const PROXIMITY_EVENT: &str = "command.Event.ProximityEvent";

    // ─── Queries (server → viewer, answered with `.response`) ───
    pub const MAP_GET_TOWN_DATA: &str = "map.getTownData";
    pub const PLAYER_GET_INFO: &str = "command.player.GetPlayerInfo";
    pub const NPC_GET_LIST: &str = "command.npc.GetNPCs";
    pub const NPC_GET_INFO: &str = "command.npc.GetNPCInfo";
    pub const NPC_NAVIGATE_TIME: &str = "command.map.NPCNavigateTime";

    // ─── Status (viewer → server) ───
    pub const UI_TICK: &str = "ui.tick";
}

/// Suffix appended to a query command to name its reply.
pub const RESPONSE_SUFFIX: &str = ".response";

/// One protocol frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    pub command: String,
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    pub fn new(command: &str, data: Value) -> Self {
        Self {
            command: command.to_string(),
            data,
        }
    }

    /// Bare command with no payload.
    pub fn bare(command: &str) -> Self {
        Self::new(command, Value::Null)
    }

    /// Reply envelope: `<command>.response` carrying `data`.
    pub fn response(command: &str, data: Value) -> Self {
        Self::new(&format!("{command}{RESPONSE_SUFFIX}"), data)
    }

    /// Payload after unwrapping possible double-encoding. A missing payload
    /// decodes like an empty object, so commands whose fields all have
    /// defaults accept a bare envelope.
    pub fn payload_value(&self) -> Result<Value, ViewerError> {
        match &self.data {
            Value::Null => Ok(Value::Object(serde_json::Map::new())),
            Value::String(inner) => serde_json::from_str(inner)
                .map_err(|e| ViewerError::malformed(&self.command, e)),
            other => Ok(other.clone()),
        }
    }

    /// Decodes the payload into a typed struct.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, ViewerError> {
        let value = self.payload_value()?;
        serde_json::from_value(value).map_err(|e| ViewerError::malformed(&self.command, e))
    }
}

/// Hello payload opening the handshake.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HelloData {
    pub protocol: u32,
    pub viewer: String,
}

/// `server.tick` payload. `steps == 0` is a snapshot request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TickData {
    #[serde(default = "default_tick_steps")]
    pub steps: u32,
    /// Per-entity activity updates applied after the clock advances.
    #[serde(default)]
    pub updates: std::collections::BTreeMap<String, Value>,
}

fn default_tick_steps() -> u32 {
    1
}

/// `npc.navigate` payload. `direction` stays a raw token: an unknown
/// spelling stops the walk rather than failing the command.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NavigateData {
    pub npc_name: String,
    #[serde(default = "default_speed")]
    pub speed: u32,
    pub direction: String,
}

fn default_speed() -> u32 {
    1
}

/// `npc.emoji` payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmojiData {
    pub npc_name: String,
    pub emoji_text: String,
}

/// `npc.setActivity` addressing; the activity itself is decoded from the
/// same payload by the activity module.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SetActivityData {
    pub npc_name: String,
}

/// `chat.update` payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatUpdateData {
    pub npc_name: String,
    pub text: Option<String>,
}

/// `command.npc.GetNPCInfo` payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NpcQueryData {
    pub npc_name: String,
}

/// `command.map.UserNavigate` payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserNavigateData {
    pub x: i32,
    pub y: i32,
}

/// `command.map.NPCNavigateTime` payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NavigateTimeData {
    pub npc_name: String,
    pub x: i32,
    pub y: i32,
}

/// `command.Event.ProximityEvent` payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProximityData {
    pub npc_a: String,
    pub npc_b: String,
}

/// Direction tokens arrive as free-form strings; parse or `None`.
pub fn parse_direction(token: &str) -> Option<Direction> {
    token.parse().ok()
}

/// Persistent framed connection carrying envelopes.
#[derive(Debug)]
pub struct ViewerConn {
    stream: TcpStream,
}

impl ViewerConn {
    pub fn new(stream: TcpStream) -> Self {
        Self { stream }
    }

    pub async fn connect(addr: SocketAddr) -> anyhow::Result<Self> {
        let stream = TcpStream::connect(addr).await.context("tcp connect")?;
        Ok(Self::new(stream))
    }

    pub async fn send(&mut self, env: &Envelope) -> anyhow::Result<()> {
        let payload = serde_json::to_vec(env).context("serialize envelope")?;
        let mut buf = BytesMut::with_capacity(4 + payload.len());
        buf.put_u32(payload.len() as u32);
        buf.extend_from_slice(&payload);
        self.stream.write_all(&buf).await.context("tcp write")?;
        Ok(())
    }

    pub async fn recv(&mut self) -> anyhow::Result<Envelope> {
        let mut len_buf = [0u8; 4];
        self.stream
            .read_exact(&mut len_buf)
            .await
            .context("tcp read len")?;
        let len = u32::from_be_bytes(len_buf) as usize;
        if len > MAX_FRAME_LEN {
            anyhow::bail!("frame length {len} exceeds maximum");
        }
        let mut payload = vec![0u8; len];
        self.stream
            .read_exact(&mut payload)
            .await
            .context("tcp read payload")?;
        let env = serde_json::from_slice(&payload).context("deserialize envelope")?;
        Ok(env)
    }

    /// Receives one envelope within the given timeout.
    pub async fn recv_timeout(
        &mut self,
        timeout: std::time::Duration,
    ) -> anyhow::Result<Option<Envelope>> {
        match time::timeout(timeout, self.recv()).await {
            Ok(Ok(env)) => Ok(Some(env)),
            Ok(Err(e)) => Err(e),
            Err(_) => Ok(None),
        }
    }

    pub fn peer_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.stream.peer_addr()?)
    }
}

/// TCP listener for the stand-in backend.
pub struct ViewerListener {
    listener: TcpListener,
}

impl ViewerListener {
    pub async fn bind(addr: SocketAddr) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr).await.context("tcp bind")?;
        Ok(Self { listener })
    }

    pub async fn accept(&self) -> anyhow::Result<(ViewerConn, SocketAddr)> {
        let (stream, addr) = self.listener.accept().await.context("tcp accept")?;
        Ok((ViewerConn::new(stream), addr))
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
}

/// Convenience codec helpers.
pub fn encode_to_bytes(env: &Envelope) -> anyhow::Result<Vec<u8>> {
    serde_json::to_vec(env).context("serialize")
}

pub fn decode_from_bytes(b: &[u8]) -> anyhow::Result<Envelope> {
    serde_json::from_slice(b).context("deserialize")
}
