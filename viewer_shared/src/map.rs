//! Town map tables.
//!
//! Loads the static tilemap matrices a town ships with: a meta file plus
//! named maze layers (CSV grids of block ids) and block-definition tables.
//! Everything is read once at session start and served immutable afterwards;
//! `map.getTownData` replies with the cached JSON form unchanged.
//!
//! Layout under the map directory:
//!   `maze_meta_info.json`
//!   `maze/<layer>.csv`            one row per line, comma-separated ids
//!   `special_blocks/<table>.csv`  `id, label...` per line

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use crate::grid::TilePos;

/// Layer consulted for walkability.
pub const COLLISION_LAYER: &str = "collision_maze";

bitflags::bitflags! {
    /// Per-tile classification derived from the maze layers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TileFlags: u32 {
        const COLLIDE     = 1 << 0;
        const SECTOR      = 1 << 1;
        const ARENA       = 1 << 2;
        const GAME_OBJECT = 1 << 3;
        const SPAWN       = 1 << 4;
    }
}

/// Maze metadata from `maze_meta_info.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MazeMeta {
    pub world_name: String,
    pub maze_width: u32,
    pub maze_height: u32,
    /// Square tile edge in pixels. Render-side concern, carried through.
    pub sq_tile_size: u32,
    #[serde(default)]
    pub special_constraint: String,
}

/// One CSV grid of block ids.
#[derive(Debug, Clone)]
pub struct MazeLayer {
    pub name: String,
    pub width: u32,
    pub height: u32,
    tiles: Vec<u32>,
}

impl MazeLayer {
    /// Block id at `pos`, if in bounds.
    pub fn at(&self, pos: TilePos) -> Option<u32> {
        if pos.x < 0 || pos.y < 0 || pos.x as u32 >= self.width || pos.y as u32 >= self.height {
            return None;
        }
        self.tiles
            .get(pos.y as usize * self.width as usize + pos.x as usize)
            .copied()
    }

    fn parse(name: &str, text: &str) -> anyhow::Result<Self> {
        let mut tiles = Vec::new();
        let mut width = 0usize;
        let mut height = 0usize;

        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let row: Vec<u32> = line
                .split(',')
                .map(|cell| {
                    cell.trim()
                        .parse::<u32>()
                        .with_context(|| format!("{name} line {}: bad cell", lineno + 1))
                })
                .collect::<anyhow::Result<_>>()?;

            if width == 0 {
                width = row.len();
            } else if row.len() != width {
                bail!(
                    "{name} line {}: ragged row ({} cells, expected {width})",
                    lineno + 1,
                    row.len()
                );
            }
            tiles.extend(row);
            height += 1;
        }

        if width == 0 {
            bail!("{name}: empty layer");
        }

        Ok(Self {
            name: name.to_string(),
            width: width as u32,
            height: height as u32,
            tiles,
        })
    }

    fn rows_json(&self) -> Value {
        let rows: Vec<Vec<u32>> = self
            .tiles
            .chunks(self.width as usize)
            .map(|row| row.to_vec())
            .collect();
        json!(rows)
    }
}

/// One line of a block table: numeric id plus its human-readable label.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockDef {
    pub id: u32,
    pub label: String,
}

/// Immutable town map: meta, maze layers, block tables, and the cached
/// JSON pass-through served for `map.getTownData`.
#[derive(Debug, Clone)]
pub struct TownMap {
    pub name: String,
    pub meta: MazeMeta,
    layers: BTreeMap<String, MazeLayer>,
    blocks: BTreeMap<String, Vec<BlockDef>>,
    town_data: Value,
}

impl TownMap {
    /// Loads a town from its map directory.
    pub fn load<P: AsRef<Path>>(dir: P, name: &str) -> anyhow::Result<Self> {
        let dir = dir.as_ref();

        let meta_path = dir.join("maze_meta_info.json");
        let meta_text = fs::read_to_string(&meta_path)
            .with_context(|| format!("open {}", meta_path.display()))?;
        let meta: MazeMeta = serde_json::from_str(&meta_text).context("parse maze meta")?;

        let mut layers = BTreeMap::new();
        let maze_dir = dir.join("maze");
        if maze_dir.is_dir() {
            for entry in fs::read_dir(&maze_dir).context("read maze dir")? {
                let path = entry?.path();
                let Some(layer_name) = csv_stem(&path) else {
                    continue;
                };
                let text = fs::read_to_string(&path)
                    .with_context(|| format!("open {}", path.display()))?;
                let layer = MazeLayer::parse(&layer_name, &text)?;
                layers.insert(layer_name, layer);
            }
        }

        let mut blocks = BTreeMap::new();
        let blocks_dir = dir.join("special_blocks");
        if blocks_dir.is_dir() {
            for entry in fs::read_dir(&blocks_dir).context("read special_blocks dir")? {
                let path = entry?.path();
                let Some(table_name) = csv_stem(&path) else {
                    continue;
                };
                let text = fs::read_to_string(&path)
                    .with_context(|| format!("open {}", path.display()))?;
                blocks.insert(table_name, parse_block_table(&text));
            }
        }

        info!(
            map = %name,
            layers = layers.len(),
            block_tables = blocks.len(),
            "Town map loaded"
        );

        Ok(Self::from_parts(name.to_string(), meta, layers, blocks))
    }

    /// Assembles a town from already-parsed tables (tests, embedded data).
    pub fn from_parts(
        name: String,
        meta: MazeMeta,
        layers: BTreeMap<String, MazeLayer>,
        blocks: BTreeMap<String, Vec<BlockDef>>,
    ) -> Self {
        let town_data = json!({
            "maze_name": &name,
            "meta": &meta,
            "layers": layers
                .iter()
                .map(|(n, l)| (n.clone(), l.rows_json()))
                .collect::<BTreeMap<String, Value>>(),
            "blocks": &blocks,
        });

        Self {
            name,
            meta,
            layers,
            blocks,
            town_data,
        }
    }

    /// Maze layer by name.
    pub fn layer(&self, name: &str) -> Option<&MazeLayer> {
        self.layers.get(name)
    }

    /// Block table by name.
    pub fn blocks(&self, table: &str) -> Option<&[BlockDef]> {
        self.blocks.get(table).map(|v| v.as_slice())
    }

    pub fn in_bounds(&self, pos: TilePos) -> bool {
        pos.x >= 0
            && pos.y >= 0
            && (pos.x as u32) < self.meta.maze_width
            && (pos.y as u32) < self.meta.maze_height
    }

    /// True when the collision layer marks `pos` blocked. Out-of-bounds
    /// tiles count as blocked.
    pub fn is_collision(&self, pos: TilePos) -> bool {
        match self.layers.get(COLLISION_LAYER) {
            Some(layer) => layer.at(pos).map_or(true, |id| id != 0),
            None => !self.in_bounds(pos),
        }
    }

    /// Per-tile classification across all known layers.
    pub fn flags_at(&self, pos: TilePos) -> TileFlags {
        let mut flags = TileFlags::empty();
        let mut set = |layer: &str, flag: TileFlags| {
            if let Some(id) = self.layers.get(layer).and_then(|l| l.at(pos)) {
                if id != 0 {
                    flags |= flag;
                }
            }
        };
        set(COLLISION_LAYER, TileFlags::COLLIDE);
        set("sector_maze", TileFlags::SECTOR);
        set("arena_maze", TileFlags::ARENA);
        set("game_object_maze", TileFlags::GAME_OBJECT);
        set("spawning_location_maze", TileFlags::SPAWN);
        flags
    }

    /// Load-time cached tables, served unchanged for `map.getTownData`.
    pub fn town_data(&self) -> &Value {
        &self.town_data
    }
}

fn csv_stem(path: &Path) -> Option<String> {
    if path.extension().and_then(|e| e.to_str()) != Some("csv") {
        return None;
    }
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(|s| s.to_string())
}

fn parse_block_table(text: &str) -> Vec<BlockDef> {
    text.lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() {
                return None;
            }
            let (id, label) = line.split_once(',')?;
            Some(BlockDef {
                id: id.trim().parse().ok()?,
                label: label.trim().to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_town() -> TownMap {
        let meta = MazeMeta {
            world_name: "the Ville".to_string(),
            maze_width: 3,
            maze_height: 2,
            sq_tile_size: 32,
            special_constraint: String::new(),
        };
        let mut layers = BTreeMap::new();
        layers.insert(
            COLLISION_LAYER.to_string(),
            MazeLayer::parse(COLLISION_LAYER, "0, 32125, 0\n0, 0, 32125\n").unwrap(),
        );
        layers.insert(
            "sector_maze".to_string(),
            MazeLayer::parse("sector_maze", "7, 7, 0\n0, 0, 0\n").unwrap(),
        );
        let mut blocks = BTreeMap::new();
        blocks.insert(
            "sector_blocks".to_string(),
            parse_block_table("7, the Ville, artist's co-living space\n"),
        );
        TownMap::from_parts("the_ville".to_string(), meta, layers, blocks)
    }

    #[test]
    fn collision_lookup() {
        let town = sample_town();
        assert!(!town.is_collision(TilePos::new(0, 0)));
        assert!(town.is_collision(TilePos::new(1, 0)));
        // Out of bounds counts as blocked.
        assert!(town.is_collision(TilePos::new(-1, 0)));
        assert!(town.is_collision(TilePos::new(0, 5)));
    }

    #[test]
    fn tile_flags_combine_layers() {
        let town = sample_town();
        let flags = town.flags_at(TilePos::new(1, 0));
        assert!(flags.contains(TileFlags::COLLIDE));
        assert!(flags.contains(TileFlags::SECTOR));
        assert!(!flags.contains(TileFlags::ARENA));
    }

    #[test]
    fn block_table_parsing() {
        let town = sample_town();
        let table = town.blocks("sector_blocks").unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table[0].id, 7);
        assert_eq!(table[0].label, "the Ville, artist's co-living space");
    }

    #[test]
    fn ragged_layer_is_rejected() {
        assert!(MazeLayer::parse("bad", "0, 1\n0\n").is_err());
    }

    #[test]
    fn town_data_includes_all_tables() {
        let town = sample_town();
        let data = town.town_data();
        assert_eq!(data["maze_name"], "the_ville");
        assert!(data["layers"].get(COLLISION_LAYER).is_some());
        assert!(data["blocks"].get("sector_blocks").is_some());
    }
}
