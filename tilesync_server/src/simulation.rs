//! Authoritative player simulation.
//!
//! Runs inside the room's fixed step only. Every player's queue is flushed
//! completely each step, one movement application per queued command.

use std::collections::BTreeMap;

use rand::Rng;
use tilesync_shared::{
    config::SimConstants,
    grid::WorldGrid,
    input::{InputCommand, InputQueue},
    math::Vec2,
    movement::{MovementResolver, TileQuery},
    sync::SessionId,
};

/// Server-side player entity.
#[derive(Debug, Clone)]
pub struct Player {
    pub position: Vec2,
    pub inputs: InputQueue,
}

impl Player {
    pub fn new(position: Vec2) -> Self {
        Self {
            position,
            inputs: InputQueue::new(),
        }
    }

    /// Applies every queued command. Returns true if the position changed.
    pub fn apply_queued(
        &mut self,
        resolver: &MovementResolver,
        velocity: f32,
        world: &impl TileQuery,
    ) -> bool {
        let start = self.position;
        let mut pos = start;
        for cmd in self.inputs.drain() {
            pos = resolver.resolve(pos, cmd.delta(velocity), world);
        }
        self.position = pos;
        pos != start
    }
}

/// Applies queued input for all players; returns who moved.
pub fn process_inputs(
    players: &mut BTreeMap<SessionId, Player>,
    grid: &WorldGrid,
    constants: &SimConstants,
) -> Vec<SessionId> {
    let resolver = MovementResolver::from_constants(constants);
    players
        .iter_mut()
        .filter_map(|(id, player)| {
            player
                .apply_queued(&resolver, constants.player_velocity, grid)
                .then(|| id.clone())
        })
        .collect()
}

/// Appends a command to a player's queue; unknown sessions are ignored.
pub fn queue_input(
    players: &mut BTreeMap<SessionId, Player>,
    session_id: &str,
    cmd: InputCommand,
) -> bool {
    match players.get_mut(session_id) {
        Some(player) => {
            player.inputs.push(cmd);
            true
        }
        None => false,
    }
}

/// Picks the centre of a walkable cell to spawn in.
///
/// Tries random cells first, then the first walkable cell in row-major
/// order, then the middle of the world.
pub fn spawn_point(grid: &WorldGrid, tile_size: f32, rng: &mut impl Rng) -> Vec2 {
    const RANDOM_ATTEMPTS: usize = 64;

    let centre = |cx: i32, cy: i32| {
        Vec2::new(
            cx as f32 * tile_size + tile_size / 2.0,
            cy as f32 * tile_size + tile_size / 2.0,
        )
    };

    if grid.is_empty() {
        return Vec2::ZERO;
    }

    for _ in 0..RANDOM_ATTEMPTS {
        let cx = rng.gen_range(0..grid.width()) as i32;
        let cy = rng.gen_range(0..grid.height()) as i32;
        if grid.is_walkable(cx, cy) {
            return centre(cx, cy);
        }
    }

    grid.cells()
        .find(|(_, _, cell)| cell.block_type.is_walkable())
        .map(|(cx, cy, _)| centre(cx, cy))
        .unwrap_or_else(|| {
            Vec2::new(
                grid.width() as f32 * tile_size / 2.0,
                grid.height() as f32 * tile_size / 2.0,
            )
        })
}
