//! Per-entity movement sequencing.
//!
//! Playing one movement step is the only async suboperation in the command
//! path: the dispatcher hands a step to a [`StepAnimator`] and gets the
//! completion back as a [`MotionDone`] on its own loop. Each entity carries
//! an activity generation; starting a new activity bumps it, and a
//! completion whose generation no longer matches is stale and dropped.
//! At most one step is in flight per entity, which keeps an entity's own
//! updates FIFO. No ordering across entities.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use viewer_shared::grid::Direction;

/// Completion of one played step, routed back to the dispatcher loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MotionDone {
    pub name: String,
    pub generation: u64,
}

/// Plays the visible part of a single movement step.
#[async_trait]
pub trait StepAnimator: Send + Sync {
    async fn play_step(&self, name: &str, direction: Direction, speed: u32);
}

/// Real-time animator: one tile takes `tile_duration / speed`.
pub struct TimedAnimator {
    tile_duration: Duration,
}

impl TimedAnimator {
    pub fn new(tile_duration: Duration) -> Self {
        Self { tile_duration }
    }
}

impl Default for TimedAnimator {
    fn default() -> Self {
        // One tile per second at speed 1.
        Self::new(Duration::from_secs(1))
    }
}

#[async_trait]
impl StepAnimator for TimedAnimator {
    async fn play_step(&self, _name: &str, _direction: Direction, speed: u32) {
        let speed = speed.max(1);
        tokio::time::sleep(self.tile_duration / speed).await;
    }
}

/// Completes immediately; for tests and headless runs.
#[derive(Default)]
pub struct InstantAnimator;

#[async_trait]
impl StepAnimator for InstantAnimator {
    async fn play_step(&self, _name: &str, _direction: Direction, _speed: u32) {}
}

/// Per-entity activity generations and in-flight step bookkeeping.
#[derive(Default)]
pub struct MotionTracker {
    entries: HashMap<String, MotionEntry>,
}

struct MotionEntry {
    generation: u64,
    speed: u32,
}

impl MotionTracker {
    /// Starts a new activity generation for `name`, invalidating any
    /// in-flight completion. Returns the new generation.
    pub fn bump(&mut self, name: &str, speed: u32) -> u64 {
        let entry = self.entries.entry(name.to_string()).or_insert(MotionEntry {
            generation: 0,
            speed,
        });
        entry.generation += 1;
        entry.speed = speed;
        entry.generation
    }

    /// Current generation for `name` (0 before any activity).
    pub fn current(&self, name: &str) -> u64 {
        self.entries.get(name).map_or(0, |e| e.generation)
    }

    /// Speed recorded with the current generation.
    pub fn speed(&self, name: &str) -> u32 {
        self.entries.get(name).map_or(1, |e| e.speed)
    }

    /// True when `done` belongs to the current generation.
    pub fn is_current(&self, done: &MotionDone) -> bool {
        self.current(&done.name) == done.generation
    }
}

/// Spawns a step playback task; the completion lands on `tx`.
pub fn spawn_step(
    animator: &Arc<dyn StepAnimator>,
    tx: &mpsc::UnboundedSender<MotionDone>,
    name: &str,
    direction: Direction,
    speed: u32,
    generation: u64,
) {
    let animator = Arc::clone(animator);
    let tx = tx.clone();
    let name = name.to_string();
    tokio::spawn(async move {
        animator.play_step(&name, direction, speed).await;
        // Receiver gone means the session is shutting down.
        let _ = tx.send(MotionDone { name, generation });
    });
}
