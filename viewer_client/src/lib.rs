//! `viewer_client`
//!
//! Client-side systems:
//! - Connection management and the per-connection state machine
//! - Command dispatch into the entity registry and clock
//! - Per-entity movement sequencing (generation-guarded completions)
//! - Rendering abstraction seam

pub mod client;
pub mod dispatch;
pub mod motion;
pub mod render;

pub use client::ViewerClient;
