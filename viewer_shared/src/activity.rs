//! Entity activities and their display glyphs.
//!
//! The backend describes what a character is doing with a tagged payload
//! (`{"activity": "move", ...}`). That open wire shape is decoded into the
//! closed [`Activity`] enum here, so adding a variant is a compile-time
//! decision rather than a runtime fallthrough.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ViewerError;
use crate::grid::Direction;

/// What a character is currently doing. Always paired with the glyph
/// derived by [`Activity::glyph`]; the two are never set independently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Activity {
    Idle,
    Moving { path: VecDeque<Direction> },
    Thinking { message: String },
    Chatting { target: String, message: String },
    Interacting { message: String },
    Emoting { emoji: String },
}

impl Activity {
    /// Fixed activity → glyph table shown above each character.
    pub fn glyph(&self) -> String {
        match self {
            Activity::Idle => "💤".to_string(),
            Activity::Moving { .. } => "👣".to_string(),
            Activity::Thinking { .. } => "🤔".to_string(),
            Activity::Chatting { .. } => "💬".to_string(),
            Activity::Interacting { .. } => "🤝".to_string(),
            Activity::Emoting { emoji } => emoji.clone(),
        }
    }

    /// Wire tag, used in snapshots.
    pub fn kind(&self) -> &'static str {
        match self {
            Activity::Idle => "idle",
            Activity::Moving { .. } => "move",
            Activity::Thinking { .. } => "think",
            Activity::Chatting { .. } => "chat",
            Activity::Interacting { .. } => "interact",
            Activity::Emoting { .. } => "emote",
        }
    }
}

/// Tagged activity payload as it appears on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "activity", rename_all = "lowercase")]
pub enum ActivityUpdate {
    Idle,
    Move {
        #[serde(default)]
        path: Vec<Direction>,
    },
    Think {
        message: String,
    },
    Chat {
        target: String,
        message: String,
    },
    Interact {
        message: String,
    },
    Emote {
        emoji: String,
    },
}

impl ActivityUpdate {
    /// Decodes a raw payload, distinguishing an out-of-set tag
    /// (`UnsupportedActivity`) from a structurally broken one
    /// (`MalformedMessage`). State is untouched either way.
    pub fn from_value(command: &str, value: &Value) -> Result<Self, ViewerError> {
        let tag = value
            .get("activity")
            .and_then(Value::as_str)
            .ok_or_else(|| ViewerError::malformed(command, "missing 'activity' tag"))?;

        const KNOWN: [&str; 6] = ["idle", "move", "think", "chat", "interact", "emote"];
        if !KNOWN.contains(&tag) {
            return Err(ViewerError::UnsupportedActivity(tag.to_string()));
        }

        serde_json::from_value(value.clone()).map_err(|e| ViewerError::malformed(command, e))
    }
}

impl From<ActivityUpdate> for Activity {
    fn from(update: ActivityUpdate) -> Self {
        match update {
            ActivityUpdate::Idle => Activity::Idle,
            ActivityUpdate::Move { path } => Activity::Moving {
                path: path.into_iter().collect(),
            },
            ActivityUpdate::Think { message } => Activity::Thinking { message },
            ActivityUpdate::Chat { target, message } => Activity::Chatting { target, message },
            ActivityUpdate::Interact { message } => Activity::Interacting { message },
            ActivityUpdate::Emote { emoji } => Activity::Emoting { emoji },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn glyph_table_is_fixed() {
        assert_eq!(Activity::Idle.glyph(), "💤");
        assert_eq!(
            Activity::Moving {
                path: VecDeque::new()
            }
            .glyph(),
            "👣"
        );
        assert_eq!(
            Activity::Thinking {
                message: "hm".into()
            }
            .glyph(),
            "🤔"
        );
        assert_eq!(
            Activity::Emoting {
                emoji: "🎉".into()
            }
            .glyph(),
            "🎉"
        );
    }

    #[test]
    fn decode_move_update() {
        let v = json!({"activity": "move", "path": ["down", "left"]});
        let update = ActivityUpdate::from_value("npc.setActivity", &v).unwrap();
        assert_eq!(
            update,
            ActivityUpdate::Move {
                path: vec![Direction::Down, Direction::Left]
            }
        );
    }

    #[test]
    fn unknown_tag_is_unsupported_not_malformed() {
        let v = json!({"activity": "teleport"});
        match ActivityUpdate::from_value("npc.setActivity", &v) {
            Err(ViewerError::UnsupportedActivity(tag)) => assert_eq!(tag, "teleport"),
            other => panic!("expected UnsupportedActivity, got {other:?}"),
        }
    }

    #[test]
    fn broken_shape_is_malformed() {
        let v = json!({"activity": "think"});
        assert!(matches!(
            ActivityUpdate::from_value("npc.setActivity", &v),
            Err(ViewerError::MalformedMessage { .. })
        ));
    }
}
