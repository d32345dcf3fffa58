//! Room state.
//!
//! A `Room` owns the grid and the players outright and is driven by exactly
//! one task, so nothing in here locks. Network handlers never touch it
//! directly; they send commands to the room loop (see `server.rs`), which
//! calls these methods between fixed steps.

use std::{collections::BTreeMap, time::Duration};

use rand::{rngs::StdRng, SeedableRng};
use tilesync_shared::{
    config::SimConstants,
    grid::WorldGrid,
    input::InputCommand,
    math::Vec2,
    sync::{SessionId, SyncEvent, WorldSnapshot},
    tick::TickScheduler,
};
use tracing::{debug, info};

use crate::{
    mutation::{self, MutationError},
    persistence::SavedWorld,
    simulation::{self, Player},
    tracker::ChangeTracker,
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JoinError {
    #[error("room is full ({0} players)")]
    Full(usize),
    #[error("session {0} already joined")]
    Duplicate(SessionId),
}

pub struct Room {
    constants: SimConstants,
    grid: WorldGrid,
    players: BTreeMap<SessionId, Player>,
    scheduler: TickScheduler,
    tracker: ChangeTracker,
    max_players: usize,
    rng: StdRng,
}

impl Room {
    pub fn new(grid: WorldGrid, max_players: usize) -> Self {
        Self::with_rng(grid, max_players, StdRng::from_entropy())
    }

    /// Deterministic spawn points for tests.
    pub fn with_rng(grid: WorldGrid, max_players: usize, rng: StdRng) -> Self {
        Self {
            constants: SimConstants::CURRENT,
            grid,
            players: BTreeMap::new(),
            scheduler: TickScheduler::default(),
            tracker: ChangeTracker::new(),
            max_players,
            rng,
        }
    }

    pub fn grid(&self) -> &WorldGrid {
        &self.grid
    }

    pub fn tick(&self) -> u64 {
        self.scheduler.ticks()
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn player_position(&self, session_id: &str) -> Option<Vec2> {
        self.players.get(session_id).map(|p| p.position)
    }

    pub fn pending_inputs(&self, session_id: &str) -> Option<usize> {
        self.players.get(session_id).map(|p| p.inputs.len())
    }

    /// Spawns a player at a random walkable cell and returns the bootstrap
    /// snapshot for it.
    pub fn join(&mut self, session_id: SessionId) -> Result<WorldSnapshot, JoinError> {
        let pos = simulation::spawn_point(&self.grid, self.constants.tile_size, &mut self.rng);
        self.join_at(session_id, pos)
    }

    pub fn join_at(&mut self, session_id: SessionId, pos: Vec2) -> Result<WorldSnapshot, JoinError> {
        if self.players.contains_key(&session_id) {
            return Err(JoinError::Duplicate(session_id));
        }
        if self.players.len() >= self.max_players {
            return Err(JoinError::Full(self.max_players));
        }
        self.tracker.player_joined(&session_id, pos);
        info!(session_id = %session_id, x = pos.x, y = pos.y, "Player joined");
        self.players.insert(session_id, Player::new(pos));
        Ok(self.snapshot())
    }

    /// Removes a player and its pending input.
    pub fn leave(&mut self, session_id: &str) -> bool {
        match self.players.remove_entry(session_id) {
            Some((id, _)) => {
                self.tracker.player_left(&id);
                info!(session_id = %id, "Player left");
                true
            }
            None => false,
        }
    }

    pub fn queue_input(&mut self, session_id: &str, cmd: InputCommand) -> bool {
        simulation::queue_input(&mut self.players, session_id, cmd)
    }

    /// Edits from sessions that are not joined players are ignored.
    pub fn place_block(&mut self, session_id: &str, x: i32, y: i32, raw_type: i32) -> bool {
        if !self.is_member(session_id, "place") {
            return false;
        }
        let result = mutation::place_block(&mut self.grid, x, y, raw_type);
        self.record_mutation(session_id, "place", result)
    }

    pub fn break_block(&mut self, session_id: &str, x: i32, y: i32) -> bool {
        if !self.is_member(session_id, "break") {
            return false;
        }
        let result = mutation::break_block(&mut self.grid, x, y);
        self.record_mutation(session_id, "break", result)
    }

    fn is_member(&self, session_id: &str, op: &'static str) -> bool {
        let joined = self.players.contains_key(session_id);
        if !joined {
            debug!(session_id, op, "Block edit from unknown session");
        }
        joined
    }

    fn record_mutation(
        &mut self,
        session_id: &str,
        op: &'static str,
        result: Result<tilesync_shared::sync::CellChange, MutationError>,
    ) -> bool {
        match result {
            Ok(change) => {
                debug!(session_id, op, x = change.x, y = change.y, block = ?change.block_type, "Block edited");
                self.tracker.cell_changed(change);
                true
            }
            Err(e) => {
                debug!(session_id, op, error = %e, "Block edit rejected");
                false
            }
        }
    }

    /// Feeds wall-clock time to the scheduler; returns steps run.
    pub fn advance(&mut self, delta: Duration) -> u32 {
        let Self {
            constants,
            grid,
            players,
            scheduler,
            tracker,
            ..
        } = self;
        scheduler.advance(delta, || run_step(players, grid, constants, tracker))
    }

    /// Runs exactly one simulation step.
    pub fn fixed_tick(&mut self) {
        run_step(
            &mut self.players,
            &self.grid,
            &self.constants,
            &mut self.tracker,
        );
    }

    pub fn drain_events(&mut self) -> Vec<SyncEvent> {
        self.tracker.drain(&self.players)
    }

    pub fn snapshot(&self) -> WorldSnapshot {
        WorldSnapshot::capture(
            &self.grid,
            self.players.iter().map(|(id, p)| (id, p.position)),
        )
    }

    pub fn save_document(&self) -> SavedWorld {
        SavedWorld::capture(&self.grid)
    }
}

fn run_step(
    players: &mut BTreeMap<SessionId, Player>,
    grid: &WorldGrid,
    constants: &SimConstants,
    tracker: &mut ChangeTracker,
) {
    for id in simulation::process_inputs(players, grid, constants) {
        tracker.player_moved(id);
    }
}
