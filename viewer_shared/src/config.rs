//! Session configuration.
//!
//! Read once at session start from JSON (file IO left to the binaries) and
//! never mutated afterwards. The dispatcher treats it as immutable input:
//! the entity roster seeds the registry, the timing fields seed the clock.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::grid::{Direction, TilePos};

/// Accepted `start_date` spelling, e.g. `February 13, 2023`.
const START_DATE_FORMAT: &str = "%B %d, %Y";
/// Accepted `start_time` spellings.
const START_TIME_FORMATS: [&str; 2] = ["%H:%M:%S", "%H:%M"];

/// Root session configuration shared by viewer and stand-in backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Backend address, e.g. `127.0.0.1:41000`.
    #[serde(default = "default_server_addr")]
    pub server_addr: String,
    /// Town map name, e.g. `the_ville`.
    #[serde(default = "default_maze_name")]
    pub maze_name: String,
    /// Directory holding the map meta/layer/block files.
    #[serde(default = "default_map_dir")]
    pub map_dir: String,
    /// Game seconds represented by one simulation step.
    #[serde(default)]
    pub sec_per_step: Option<u32>,
    /// Session start date, e.g. `February 13, 2023`.
    #[serde(default)]
    pub start_date: Option<String>,
    /// Session start time, e.g. `07:30:00`.
    #[serde(default)]
    pub start_time: Option<String>,
    /// Step counter the session resumes from.
    #[serde(default)]
    pub step: u64,
    /// Characters to register at session start.
    #[serde(default)]
    pub roster: Vec<SpawnEntry>,
}

/// One roster line: where a character appears and which way it faces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpawnEntry {
    pub name: String,
    pub spawn: TilePos,
    #[serde(default = "default_direction")]
    pub direction: Direction,
    /// Marks the camera-following player character.
    #[serde(default)]
    pub player: bool,
}

fn default_server_addr() -> String {
    "127.0.0.1:41000".to_string()
}

fn default_maze_name() -> String {
    "the_ville".to_string()
}

fn default_map_dir() -> String {
    "map".to_string()
}

fn default_direction() -> Direction {
    Direction::Down
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            server_addr: default_server_addr(),
            maze_name: default_maze_name(),
            map_dir: default_map_dir(),
            sec_per_step: None,
            start_date: None,
            start_time: None,
            step: 0,
            roster: Vec::new(),
        }
    }
}

impl SessionConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    /// Combined start instant, if both halves are present and parseable.
    pub fn start_datetime(&self) -> Option<NaiveDateTime> {
        let date = self.start_date.as_deref().and_then(parse_start_date)?;
        let time = self.start_time.as_deref().and_then(parse_start_time)?;
        Some(date.and_time(time))
    }

    /// Name of the roster entry flagged as the player, if any.
    pub fn player_name(&self) -> Option<&str> {
        self.roster
            .iter()
            .find(|e| e.player)
            .map(|e| e.name.as_str())
    }
}

fn parse_start_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, START_DATE_FORMAT).ok()
}

fn parse_start_time(s: &str) -> Option<NaiveTime> {
    START_TIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveTime::parse_from_str(s, fmt).ok())
}
