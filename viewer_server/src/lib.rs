//! `viewer_server`
//!
//! Stand-in backend used to drive viewers during development and in the
//! integration suite:
//! - Accepts viewer connections and answers the handshake
//! - Broadcasts operator/console commands as protocol envelopes
//! - Optional demo driver emitting random walk orders

pub mod server;

pub use server::SimBackend;
