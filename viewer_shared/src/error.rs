//! Error taxonomy shared by the viewer core.
//!
//! Recoverable errors (unknown entity, bad payload, ...) are caught at the
//! dispatcher boundary and logged; only configuration errors are fatal to
//! session start. IO-level failures use `anyhow` at the socket/binary edges.

use thiserror::Error;

/// Errors produced by the viewer core components.
#[derive(Debug, Error)]
pub enum ViewerError {
    /// Missing or invalid session parameters. Fatal to session start.
    #[error("session configuration incomplete: {0}")]
    Configuration(String),

    /// A command referenced an entity that was never registered.
    #[error("unknown entity '{0}'")]
    UnknownEntity(String),

    /// A spawn/register named an entity that already exists.
    #[error("entity '{0}' already registered")]
    DuplicateEntity(String),

    /// A wire payload carried an activity tag outside the closed set.
    #[error("unsupported activity '{0}'")]
    UnsupportedActivity(String),

    /// A payload failed to parse. The command is treated as a no-op.
    #[error("malformed payload for '{command}': {detail}")]
    MalformedMessage { command: String, detail: String },

    /// Socket-level failure. Reconnect-or-halt policy is the caller's.
    #[error("connection: {0}")]
    Connection(String),
}

impl ViewerError {
    /// Classifies a serde failure on `command`'s payload.
    pub fn malformed(command: &str, err: impl std::fmt::Display) -> Self {
        ViewerError::MalformedMessage {
            command: command.to_string(),
            detail: err.to_string(),
        }
    }
}
