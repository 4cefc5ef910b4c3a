//! Command dispatcher.
//!
//! Translates inbound protocol envelopes into registry/clock mutations and
//! builds outbound status messages. Every per-command failure is caught
//! here, logged once, and turned into a no-op: a bad command never corrupts
//! state for unrelated entities and never drops the connection. Nothing
//! auto-retries.

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use viewer_shared::activity::{Activity, ActivityUpdate};
use viewer_shared::clock::SimClock;
use viewer_shared::config::SessionConfig;
use viewer_shared::error::ViewerError;
use viewer_shared::grid::TilePos;
use viewer_shared::map::TownMap;
use viewer_shared::net::{
    cmd, parse_direction, ChatUpdateData, EmojiData, Envelope, NavigateData, NavigateTimeData,
    NpcQueryData, ProximityData, SetActivityData, TickData, UserNavigateData,
};
use viewer_shared::registry::{moving, EntityRegistry, MoveStep};

use crate::motion::{spawn_step, MotionDone, MotionTracker, StepAnimator};
use crate::render::RenderAdapter;

/// Inbound command handler owning all mutable session state.
pub struct CommandDispatcher {
    registry: EntityRegistry,
    clock: SimClock,
    town: Option<TownMap>,
    player: Option<String>,
    sec_per_step: Option<u32>,
    motions: MotionTracker,
    motion_tx: mpsc::UnboundedSender<MotionDone>,
    animator: Arc<dyn StepAnimator>,
    render: Box<dyn RenderAdapter>,
}

impl CommandDispatcher {
    /// Builds a dispatcher from session config, registering the roster.
    /// A duplicate roster line is logged and skipped; the registry keeps
    /// the first spawn.
    pub fn new(
        cfg: &SessionConfig,
        town: Option<TownMap>,
        animator: Arc<dyn StepAnimator>,
        render: Box<dyn RenderAdapter>,
        motion_tx: mpsc::UnboundedSender<MotionDone>,
    ) -> Self {
        let mut registry = EntityRegistry::new();
        let mut render = render;
        for entry in &cfg.roster {
            match registry.register(&entry.name, entry.spawn, entry.direction) {
                Ok(()) => {
                    if let Ok(entity) = registry.get(&entry.name) {
                        render.entity_spawned(entity);
                    }
                }
                Err(e) => warn!(entity = %entry.name, error = %e, "Spawn skipped"),
            }
        }

        Self {
            registry,
            clock: SimClock::from_config(cfg),
            town,
            player: cfg.player_name().map(|s| s.to_string()),
            sec_per_step: cfg.sec_per_step,
            motions: MotionTracker::default(),
            motion_tx,
            animator,
            render,
        }
    }

    /// Read-only view of the world for collaborators.
    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    pub fn clock(&self) -> &SimClock {
        &self.clock
    }

    /// Handles one inbound envelope; returns outbound replies. Never
    /// panics or propagates: errors become one warning and a no-op.
    pub fn handle_command(&mut self, env: &Envelope) -> Vec<Envelope> {
        let result = match env.command.as_str() {
            cmd::SERVER_TICK => self.on_tick(env),
            cmd::NPC_NAVIGATE => self.on_navigate(env),
            cmd::NPC_SET_ACTIVITY => self.on_set_activity(env),
            cmd::NPC_EMOJI => self.on_emoji(env),
            cmd::CHAT_UPDATE => self.on_chat_update(env),
            cmd::USER_NAVIGATE => self.on_user_navigate(env),
            cmd::PROXIMITY_EVENT => self.on_proximity(env),
            cmd::MAP_GET_TOWN_DATA => self.on_get_town_data(),
            cmd::PLAYER_GET_INFO => self.on_get_player_info(),
            cmd::NPC_GET_LIST => self.on_get_npcs(),
            cmd::NPC_GET_INFO => self.on_get_npc_info(env),
            cmd::NPC_NAVIGATE_TIME => self.on_navigate_time(env),
            other => {
                warn!(command = %other, "Unknown command ignored");
                return Vec::new();
            }
        };

        match result {
            Ok(replies) => replies,
            Err(e) => {
                warn!(command = %env.command, error = %e, "Command dropped");
                Vec::new()
            }
        }
    }

    /// Processes a movement-step completion from the animator. Stale
    /// generations (a newer activity took over) are dropped.
    pub fn handle_motion(&mut self, done: MotionDone) {
        if !self.motions.is_current(&done) {
            debug!(
                entity = %done.name,
                generation = done.generation,
                "Stale motion completion dropped"
            );
            return;
        }

        match self.registry.step_movement(&done.name) {
            Ok(MoveStep::Advanced {
                from,
                to,
                direction,
                remaining,
            }) => {
                self.render.step_played(&done.name, from, to, direction);
                if remaining > 0 {
                    self.spawn_next_step(&done.name, done.generation);
                } else if let Ok(entity) = self.registry.get(&done.name) {
                    self.render.activity_changed(&done.name, entity.status_glyph());
                }
            }
            Ok(MoveStep::Settled) => {}
            Err(e) => warn!(entity = %done.name, error = %e, "Motion completion dropped"),
        }
    }

    // ─── Command handlers ───

    fn on_tick(&mut self, env: &Envelope) -> Result<Vec<Envelope>, ViewerError> {
        let tick: TickData = env.payload()?;

        // A zero-step tick is a snapshot request; the clock is untouched.
        if tick.steps == 0 {
            return Ok(vec![Envelope::response(cmd::SERVER_TICK, self.snapshot()?)]);
        }

        self.clock.advance(tick.steps)?;
        for (name, update) in &tick.updates {
            if let Err(e) = self.apply_update(env.command.as_str(), name, update) {
                warn!(entity = %name, error = %e, "Tick update skipped");
            }
        }

        Ok(vec![Envelope::new(cmd::UI_TICK, self.ui_tick_data()?)])
    }

    fn on_navigate(&mut self, env: &Envelope) -> Result<Vec<Envelope>, ViewerError> {
        let data: NavigateData = env.payload()?;
        // Existence check before any mutation.
        self.registry.get(&data.npc_name)?;

        match parse_direction(&data.direction) {
            Some(direction) => {
                self.start_activity(&data.npc_name, moving([direction]), data.speed.max(1))?;
            }
            None => {
                // Bad token stops the walk and settles an idle pose rather
                // than failing the command.
                warn!(
                    entity = %data.npc_name,
                    token = %data.direction,
                    "Invalid direction; stopping movement"
                );
                self.start_activity(&data.npc_name, Activity::Idle, 1)?;
            }
        }
        Ok(Vec::new())
    }

    fn on_set_activity(&mut self, env: &Envelope) -> Result<Vec<Envelope>, ViewerError> {
        let addr: SetActivityData = env.payload()?;
        let payload = env.payload_value()?;
        self.apply_update(env.command.as_str(), &addr.npc_name, &payload)?;
        Ok(Vec::new())
    }

    fn on_emoji(&mut self, env: &Envelope) -> Result<Vec<Envelope>, ViewerError> {
        let data: EmojiData = env.payload()?;
        self.start_activity(
            &data.npc_name,
            Activity::Emoting {
                emoji: data.emoji_text,
            },
            1,
        )?;
        Ok(Vec::new())
    }

    fn on_chat_update(&mut self, env: &Envelope) -> Result<Vec<Envelope>, ViewerError> {
        let data: ChatUpdateData = env.payload()?;
        self.registry.set_chat_text(&data.npc_name, data.text.clone())?;
        self.render.chat_changed(&data.npc_name, data.text.as_deref());
        Ok(Vec::new())
    }

    fn on_user_navigate(&mut self, env: &Envelope) -> Result<Vec<Envelope>, ViewerError> {
        let data: UserNavigateData = env.payload()?;
        let player = self.require_player()?.to_string();

        self.registry.place(&player, TilePos::new(data.x, data.y))?;
        self.motions.bump(&player, 1);
        if let Ok(entity) = self.registry.get(&player) {
            self.render.activity_changed(&player, entity.status_glyph());
        }
        Ok(Vec::new())
    }

    fn on_proximity(&mut self, env: &Envelope) -> Result<Vec<Envelope>, ViewerError> {
        let data: ProximityData = env.payload()?;
        // Both must exist before either is touched.
        self.registry.get(&data.npc_a)?;
        self.registry.get(&data.npc_b)?;

        self.start_activity(
            &data.npc_a,
            Activity::Interacting {
                message: format!("meeting {}", data.npc_b),
            },
            1,
        )?;
        self.start_activity(
            &data.npc_b,
            Activity::Interacting {
                message: format!("meeting {}", data.npc_a),
            },
            1,
        )?;
        Ok(Vec::new())
    }

    fn on_get_town_data(&self) -> Result<Vec<Envelope>, ViewerError> {
        let town = self.town.as_ref().ok_or_else(|| {
            ViewerError::Configuration("no town map loaded".to_string())
        })?;
        Ok(vec![Envelope::response(
            cmd::MAP_GET_TOWN_DATA,
            town.town_data().clone(),
        )])
    }

    fn on_get_player_info(&self) -> Result<Vec<Envelope>, ViewerError> {
        let player = self.require_player()?;
        let snapshot = self.registry.get(player)?.snapshot();
        Ok(vec![Envelope::response(cmd::PLAYER_GET_INFO, snapshot)])
    }

    fn on_get_npcs(&self) -> Result<Vec<Envelope>, ViewerError> {
        let npcs: Vec<Value> = self
            .registry
            .iter()
            .filter(|e| Some(e.name()) != self.player.as_deref())
            .map(|e| e.snapshot())
            .collect();
        Ok(vec![Envelope::response(
            cmd::NPC_GET_LIST,
            json!({ "npcs": npcs }),
        )])
    }

    fn on_get_npc_info(&self, env: &Envelope) -> Result<Vec<Envelope>, ViewerError> {
        let query: NpcQueryData = env.payload()?;
        let snapshot = self.registry.get(&query.npc_name)?.snapshot();
        Ok(vec![Envelope::response(cmd::NPC_GET_INFO, snapshot)])
    }

    fn on_navigate_time(&self, env: &Envelope) -> Result<Vec<Envelope>, ViewerError> {
        let data: NavigateTimeData = env.payload()?;
        let entity = self.registry.get(&data.npc_name)?;
        let sec_per_step = self.sec_per_step.ok_or_else(|| {
            ViewerError::Configuration("sec_per_step must be set".to_string())
        })?;

        let distance = entity.position.distance(TilePos::new(data.x, data.y));
        Ok(vec![Envelope::response(
            cmd::NPC_NAVIGATE_TIME,
            json!({
                "distance": distance,
                "time": u64::from(distance) * u64::from(sec_per_step),
            }),
        )])
    }

    // ─── Internals ───

    /// Applies a tagged activity payload to one entity.
    fn apply_update(
        &mut self,
        command: &str,
        name: &str,
        payload: &Value,
    ) -> Result<(), ViewerError> {
        self.registry.get(name)?;
        let update = ActivityUpdate::from_value(command, payload)?;
        self.start_activity(name, update.into(), 1)
    }

    /// Replaces an entity's activity (last-writer-wins): applies the new
    /// activity+glyph, bumps the motion generation so stale completions
    /// are discarded, and kicks off playback when there is a path.
    fn start_activity(
        &mut self,
        name: &str,
        activity: Activity,
        speed: u32,
    ) -> Result<(), ViewerError> {
        // A move with nothing queued settles straight to idle.
        let activity = match activity {
            Activity::Moving { path } if path.is_empty() => Activity::Idle,
            other => other,
        };

        self.registry.apply_activity(name, activity)?;
        let generation = self.motions.bump(name, speed);

        let entity = self.registry.get(name)?;
        self.render.activity_changed(name, entity.status_glyph());

        if let Activity::Moving { path } = entity.activity() {
            if let Some(direction) = path.front().copied() {
                spawn_step(
                    &self.animator,
                    &self.motion_tx,
                    name,
                    direction,
                    speed,
                    generation,
                );
            }
        }
        Ok(())
    }

    fn spawn_next_step(&mut self, name: &str, generation: u64) {
        let Ok(entity) = self.registry.get(name) else {
            return;
        };
        if let Activity::Moving { path } = entity.activity() {
            if let Some(direction) = path.front().copied() {
                spawn_step(
                    &self.animator,
                    &self.motion_tx,
                    name,
                    direction,
                    self.motions.speed(name),
                    generation,
                );
            }
        }
    }

    fn require_player(&self) -> Result<&str, ViewerError> {
        self.player.as_deref().ok_or_else(|| {
            ViewerError::Configuration("no player in roster".to_string())
        })
    }

    fn snapshot(&self) -> Result<Value, ViewerError> {
        Ok(json!({
            "clock": self.clock.readout()?,
            "positions": self.registry.positions(),
            "activities": self.registry.snapshots(),
        }))
    }

    fn ui_tick_data(&self) -> Result<Value, ViewerError> {
        let mut positions = self.registry.positions();
        let player_pos = self
            .player
            .as_deref()
            .and_then(|p| positions.remove(p));
        Ok(json!({
            "clock": self.clock.readout()?,
            "npc_pos": positions,
            "player_pos": player_pos,
        }))
    }
}
