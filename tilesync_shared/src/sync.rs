//! World-state synchronization contract.
//!
//! A joining client receives one [`WorldSnapshot`] holding every cell's block
//! type (row-major, health omitted) and every player's position. After that,
//! only [`SyncEvent`]s flow. Events for the same entity are applied in send
//! order; since they carry absolute values, last-write-wins is correct.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    grid::{BlockType, GridError, WorldGrid},
    math::Vec2,
};

/// Opaque player identity assigned by the server.
pub type SessionId = String;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct PlayerPos {
    pub x: f32,
    pub y: f32,
}

impl From<Vec2> for PlayerPos {
    fn from(v: Vec2) -> Self {
        Self { x: v.x, y: v.y }
    }
}

impl From<PlayerPos> for Vec2 {
    fn from(p: PlayerPos) -> Self {
        Vec2::new(p.x, p.y)
    }
}

/// Full bootstrap state sent once per join.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldSnapshot {
    pub width: u32,
    pub height: u32,
    /// Block type per cell, index `y * width + x`.
    pub cells: Vec<u8>,
    pub players: BTreeMap<SessionId, PlayerPos>,
}

impl WorldSnapshot {
    pub fn capture<'a>(
        grid: &WorldGrid,
        players: impl IntoIterator<Item = (&'a SessionId, Vec2)>,
    ) -> Self {
        Self {
            width: grid.width(),
            height: grid.height(),
            cells: grid.block_types(),
            players: players
                .into_iter()
                .map(|(id, pos)| (id.clone(), PlayerPos::from(pos)))
                .collect(),
        }
    }

    /// Rebuilds the grid described by this snapshot.
    pub fn to_grid(&self) -> Result<WorldGrid, GridError> {
        WorldGrid::from_block_types(self.width, self.height, &self.cells)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerState {
    pub session_id: SessionId,
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CellChange {
    pub x: i32,
    pub y: i32,
    pub block_type: BlockType,
}

/// Incremental server-to-client notification.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    PlayerJoined(PlayerState),
    PlayerMoved(PlayerState),
    PlayerLeft { session_id: SessionId },
    CellChanged(CellChange),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reproduces_grid_and_players() {
        let mut grid = WorldGrid::new(3, 2);
        grid.set(2, 1, BlockType::Stone).unwrap();
        let id: SessionId = "abc".into();

        let snap = WorldSnapshot::capture(&grid, [(&id, Vec2::new(4.0, 5.0))]);
        assert_eq!(snap.cells, vec![0, 0, 0, 0, 0, 2]);
        assert_eq!(snap.players["abc"], PlayerPos { x: 4.0, y: 5.0 });
        assert_eq!(snap.to_grid().unwrap().block_types(), grid.block_types());
    }

    #[test]
    fn cell_change_uses_camel_case_keys() {
        let change = CellChange {
            x: 1,
            y: 2,
            block_type: BlockType::Wood,
        };
        let json = serde_json::to_string(&change).unwrap();
        assert_eq!(json, r#"{"x":1,"y":2,"blockType":1}"#);
    }
}
