//! Rendering abstraction.
//!
//! This crate intentionally does not depend on a graphics backend. The
//! dispatcher notifies a [`RenderAdapter`] after every state change, and a
//! renderer can read the registry through the client's `&` view. Sprite and
//! tween playback live entirely behind this trait.

use viewer_shared::grid::{Direction, TilePos};
use viewer_shared::registry::Entity;

/// Engine-facing seam consuming entity state changes.
pub trait RenderAdapter: Send {
    fn entity_spawned(&mut self, entity: &Entity);
    fn step_played(&mut self, name: &str, from: TilePos, to: TilePos, direction: Direction);
    /// Activity changed; `glyph` is the derived status glyph.
    fn activity_changed(&mut self, name: &str, glyph: &str);
    fn chat_changed(&mut self, name: &str, text: Option<&str>);
}

/// A no-op adapter useful for headless tests.
#[derive(Default)]
pub struct NullRenderAdapter;

impl RenderAdapter for NullRenderAdapter {
    fn entity_spawned(&mut self, _entity: &Entity) {}
    fn step_played(&mut self, _name: &str, _from: TilePos, _to: TilePos, _direction: Direction) {}
    fn activity_changed(&mut self, _name: &str, _glyph: &str) {}
    fn chat_changed(&mut self, _name: &str, _text: Option<&str>) {}
}

/// Logs every state change; what the standalone binary runs with.
#[derive(Default)]
pub struct TraceRenderAdapter;

impl RenderAdapter for TraceRenderAdapter {
    fn entity_spawned(&mut self, entity: &Entity) {
        tracing::debug!(name = %entity.name(), position = %entity.position, "spawned");
    }

    fn step_played(&mut self, name: &str, from: TilePos, to: TilePos, direction: Direction) {
        tracing::debug!(%name, %from, %to, %direction, "step");
    }

    fn activity_changed(&mut self, name: &str, glyph: &str) {
        tracing::debug!(%name, %glyph, "activity");
    }

    fn chat_changed(&mut self, name: &str, text: Option<&str>) {
        tracing::debug!(%name, text = text.unwrap_or(""), "chat");
    }
}
