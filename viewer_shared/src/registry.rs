//! Entity registry.
//!
//! Authoritative store of every visible character, keyed by name. The
//! command dispatcher owns the registry and is the only writer; everything
//! else (render adapter, snapshot builders) sees `&` references and the
//! query methods below. Iteration order is stable (sorted by name).

use std::collections::{BTreeMap, VecDeque};

use serde::Serialize;
use serde_json::{json, Value};

use crate::activity::Activity;
use crate::error::ViewerError;
use crate::grid::{Direction, TilePos};

/// One tracked character.
#[derive(Debug, Clone)]
pub struct Entity {
    name: String,
    pub position: TilePos,
    pub direction: Direction,
    activity: Activity,
    status_glyph: String,
    /// Transient speech-bubble text set by `chat.update`.
    pub chat_text: Option<String>,
}

impl Entity {
    fn new(name: String, position: TilePos, direction: Direction) -> Self {
        let activity = Activity::Idle;
        let status_glyph = activity.glyph();
        Self {
            name,
            position,
            direction,
            activity,
            status_glyph,
            chat_text: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn activity(&self) -> &Activity {
        &self.activity
    }

    /// Glyph paired with the current activity.
    pub fn status_glyph(&self) -> &str {
        &self.status_glyph
    }

    // Keeps the activity/glyph invariant in one place.
    fn set_activity(&mut self, activity: Activity) {
        self.status_glyph = activity.glyph();
        self.activity = activity;
    }

    /// Serialized form for `*.response` queries.
    pub fn snapshot(&self) -> Value {
        let mut extra = match &self.activity {
            Activity::Idle => json!({}),
            Activity::Moving { path } => json!({
                "steps_remaining": path.len(),
            }),
            Activity::Thinking { message } => json!({ "message": message }),
            Activity::Chatting { target, message } => json!({
                "target": target,
                "message": message,
            }),
            Activity::Interacting { message } => json!({ "message": message }),
            Activity::Emoting { emoji } => json!({ "emoji": emoji }),
        };
        let obj = extra.as_object_mut().expect("snapshot extras are objects");
        obj.insert("activity".into(), json!(self.activity.kind()));

        json!({
            "name": self.name,
            "position": self.position,
            "direction": self.direction,
            "status": extra,
            "status_glyph": self.status_glyph,
            "chat_text": self.chat_text,
        })
    }
}

/// Position/facing pair carried in `ui.tick`.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct PosSnapshot {
    pub x: i32,
    pub y: i32,
    pub direction: Direction,
}

/// Outcome of playing one movement step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveStep {
    /// Stepped one tile; `remaining` directions still queued.
    Advanced {
        from: TilePos,
        to: TilePos,
        direction: Direction,
        remaining: usize,
    },
    /// Nothing left to play; the entity is (now) idle.
    Settled,
}

/// Name-keyed store of all entities.
#[derive(Debug, Default)]
pub struct EntityRegistry {
    entities: BTreeMap<String, Entity>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new entity. The name is its immutable key for the rest
    /// of the session.
    pub fn register(
        &mut self,
        name: &str,
        position: TilePos,
        direction: Direction,
    ) -> Result<(), ViewerError> {
        if self.entities.contains_key(name) {
            return Err(ViewerError::DuplicateEntity(name.to_string()));
        }
        self.entities.insert(
            name.to_string(),
            Entity::new(name.to_string(), position, direction),
        );
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&Entity, ViewerError> {
        self.entities
            .get(name)
            .ok_or_else(|| ViewerError::UnknownEntity(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entities.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Entities in stable name order.
    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    /// Atomically replaces the activity and its derived glyph. The previous
    /// activity's fields are dropped whole; nothing leaks between variants.
    pub fn apply_activity(&mut self, name: &str, activity: Activity) -> Result<(), ViewerError> {
        let entity = self.get_known_mut(name)?;
        entity.set_activity(activity);
        Ok(())
    }

    /// Sets the transient chat bubble text.
    pub fn set_chat_text(&mut self, name: &str, text: Option<String>) -> Result<(), ViewerError> {
        let entity = self.get_known_mut(name)?;
        entity.chat_text = text;
        Ok(())
    }

    /// Moves an entity to an absolute tile and settles it idle.
    pub fn place(&mut self, name: &str, position: TilePos) -> Result<(), ViewerError> {
        let entity = self.get_known_mut(name)?;
        entity.position = position;
        entity.set_activity(Activity::Idle);
        Ok(())
    }

    /// Plays one queued movement step: pops the next direction, moves one
    /// tile, re-derives facing. Draining the queue settles the entity to
    /// `Idle`. Safe to call when the entity is not moving (duplicate
    /// completion delivery): that is a `Settled` no-op.
    pub fn step_movement(&mut self, name: &str) -> Result<MoveStep, ViewerError> {
        let entity = self.get_known_mut(name)?;

        let Activity::Moving { path } = &mut entity.activity else {
            return Ok(MoveStep::Settled);
        };

        let Some(direction) = path.pop_front() else {
            entity.set_activity(Activity::Idle);
            return Ok(MoveStep::Settled);
        };

        let remaining = path.len();
        let from = entity.position;
        entity.position = from.step(direction);
        entity.direction = direction;
        if remaining == 0 {
            entity.set_activity(Activity::Idle);
        }

        Ok(MoveStep::Advanced {
            from,
            to: entity.position,
            direction,
            remaining,
        })
    }

    /// Position/facing of every entity, for `ui.tick`.
    pub fn positions(&self) -> BTreeMap<String, PosSnapshot> {
        self.entities
            .iter()
            .map(|(name, e)| {
                (
                    name.clone(),
                    PosSnapshot {
                        x: e.position.x,
                        y: e.position.y,
                        direction: e.direction,
                    },
                )
            })
            .collect()
    }

    /// Serialized snapshots of every entity, in stable order.
    pub fn snapshots(&self) -> Vec<Value> {
        self.entities.values().map(Entity::snapshot).collect()
    }

    fn get_known_mut(&mut self, name: &str) -> Result<&mut Entity, ViewerError> {
        self.entities
            .get_mut(name)
            .ok_or_else(|| ViewerError::UnknownEntity(name.to_string()))
    }
}

/// Builds a `Moving` activity from a path.
pub fn moving(path: impl IntoIterator<Item = Direction>) -> Activity {
    Activity::Moving {
        path: path.into_iter().collect::<VecDeque<_>>(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with(name: &str, pos: TilePos) -> EntityRegistry {
        let mut reg = EntityRegistry::new();
        reg.register(name, pos, Direction::Down).unwrap();
        reg
    }

    #[test]
    fn duplicate_registration_leaves_registry_unchanged() {
        let mut reg = registry_with("Maria Lopez", TilePos::new(3, 4));
        let err = reg
            .register("Maria Lopez", TilePos::new(9, 9), Direction::Up)
            .unwrap_err();
        assert!(matches!(err, ViewerError::DuplicateEntity(_)));

        let entity = reg.get("Maria Lopez").unwrap();
        assert_eq!(entity.position, TilePos::new(3, 4));
        assert_eq!(entity.direction, Direction::Down);
    }

    #[test]
    fn unknown_entity_errors() {
        let reg = EntityRegistry::new();
        assert!(matches!(
            reg.get("Isabella"),
            Err(ViewerError::UnknownEntity(_))
        ));
    }

    #[test]
    fn activity_and_glyph_change_together() {
        let mut reg = registry_with("Maria Lopez", TilePos::new(3, 4));

        reg.apply_activity("Maria Lopez", moving([Direction::Down]))
            .unwrap();
        assert_eq!(reg.get("Maria Lopez").unwrap().status_glyph(), "👣");

        reg.apply_activity(
            "Maria Lopez",
            Activity::Thinking {
                message: "lunch".into(),
            },
        )
        .unwrap();
        assert_eq!(reg.get("Maria Lopez").unwrap().status_glyph(), "🤔");
    }

    #[test]
    fn replacing_activity_leaves_no_residue() {
        let mut reg = registry_with("Maria Lopez", TilePos::new(3, 4));

        reg.apply_activity("Maria Lopez", moving([Direction::Down, Direction::Down]))
            .unwrap();
        reg.apply_activity(
            "Maria Lopez",
            Activity::Chatting {
                target: "Klaus".into(),
                message: "hi".into(),
            },
        )
        .unwrap();

        // The old path is gone: stepping now is a settled no-op.
        assert_eq!(
            reg.step_movement("Maria Lopez").unwrap(),
            MoveStep::Settled
        );
        match reg.get("Maria Lopez").unwrap().activity() {
            Activity::Chatting { target, message } => {
                assert_eq!(target, "Klaus");
                assert_eq!(message, "hi");
            }
            other => panic!("expected Chatting, got {other:?}"),
        }
    }

    #[test]
    fn single_step_walk_settles_idle() {
        let mut reg = registry_with("Maria Lopez", TilePos::new(3, 4));
        reg.apply_activity("Maria Lopez", moving([Direction::Down]))
            .unwrap();

        let step = reg.step_movement("Maria Lopez").unwrap();
        assert_eq!(
            step,
            MoveStep::Advanced {
                from: TilePos::new(3, 4),
                to: TilePos::new(3, 5),
                direction: Direction::Down,
                remaining: 0,
            }
        );

        let entity = reg.get("Maria Lopez").unwrap();
        assert_eq!(entity.position, TilePos::new(3, 5));
        assert_eq!(entity.activity(), &Activity::Idle);
        assert_eq!(entity.status_glyph(), "💤");
    }

    #[test]
    fn step_on_idle_entity_is_safe() {
        let mut reg = registry_with("Maria Lopez", TilePos::new(3, 4));
        assert_eq!(
            reg.step_movement("Maria Lopez").unwrap(),
            MoveStep::Settled
        );
        assert_eq!(reg.get("Maria Lopez").unwrap().position, TilePos::new(3, 4));
    }

    #[test]
    fn multi_step_path_keeps_moving_until_drained() {
        let mut reg = registry_with("Maria Lopez", TilePos::new(3, 4));
        reg.apply_activity("Maria Lopez", moving([Direction::Down, Direction::Right]))
            .unwrap();

        match reg.step_movement("Maria Lopez").unwrap() {
            MoveStep::Advanced { remaining, to, .. } => {
                assert_eq!(remaining, 1);
                assert_eq!(to, TilePos::new(3, 5));
            }
            other => panic!("expected Advanced, got {other:?}"),
        }
        assert!(matches!(
            reg.get("Maria Lopez").unwrap().activity(),
            Activity::Moving { .. }
        ));

        match reg.step_movement("Maria Lopez").unwrap() {
            MoveStep::Advanced { remaining, to, .. } => {
                assert_eq!(remaining, 0);
                assert_eq!(to, TilePos::new(4, 5));
            }
            other => panic!("expected Advanced, got {other:?}"),
        }
        assert_eq!(reg.get("Maria Lopez").unwrap().activity(), &Activity::Idle);
    }

    #[test]
    fn snapshot_carries_activity_details() {
        let mut reg = registry_with("Maria Lopez", TilePos::new(3, 4));
        reg.set_chat_text("Maria Lopez", Some("hello".into()))
            .unwrap();
        reg.apply_activity(
            "Maria Lopez",
            Activity::Emoting {
                emoji: "🎉".into(),
            },
        )
        .unwrap();

        let snap = reg.get("Maria Lopez").unwrap().snapshot();
        assert_eq!(snap["name"], "Maria Lopez");
        assert_eq!(snap["status"]["activity"], "emote");
        assert_eq!(snap["status"]["emoji"], "🎉");
        assert_eq!(snap["status_glyph"], "🎉");
        assert_eq!(snap["chat_text"], "hello");
    }
}
