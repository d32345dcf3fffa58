//! Local copy of the authoritative world.
//!
//! The mirror starts empty and refuses incremental events until a full
//! snapshot has been applied. After that every event carries absolute
//! values, so applying them in arrival order converges on the server state.

use std::collections::BTreeMap;

use tilesync_shared::{
    config::{WORLD_HEIGHT, WORLD_WIDTH},
    grid::{GridError, WorldGrid},
    math::Vec2,
    net::NetMsg,
    sync::{CellChange, SessionId, WorldSnapshot},
};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MirrorError {
    #[error("snapshot is {actual_w}x{actual_h}, expected {expected_w}x{expected_h}")]
    DimensionMismatch {
        expected_w: u32,
        expected_h: u32,
        actual_w: u32,
        actual_h: u32,
    },
    #[error(transparent)]
    Grid(#[from] GridError),
}

/// What an applied event changed.
#[derive(Debug, Clone, PartialEq)]
pub enum MirrorUpdate {
    Cell(CellChange),
    PlayerUpserted { session_id: SessionId, position: Vec2 },
    PlayerRemoved { session_id: SessionId },
}

#[derive(Debug, Clone)]
pub struct WorldMirror {
    grid: WorldGrid,
    players: BTreeMap<SessionId, Vec2>,
    bootstrapped: bool,
}

impl Default for WorldMirror {
    fn default() -> Self {
        Self::new(WORLD_WIDTH, WORLD_HEIGHT)
    }
}

impl WorldMirror {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            grid: WorldGrid::new(width, height),
            players: BTreeMap::new(),
            bootstrapped: false,
        }
    }

    pub fn is_bootstrapped(&self) -> bool {
        self.bootstrapped
    }

    pub fn grid(&self) -> &WorldGrid {
        &self.grid
    }

    pub fn players(&self) -> &BTreeMap<SessionId, Vec2> {
        &self.players
    }

    pub fn player(&self, session_id: &str) -> Option<Vec2> {
        self.players.get(session_id).copied()
    }

    /// Replaces the whole local state. A snapshot that does not match the
    /// mirror's dimensions leaves it untouched.
    pub fn apply_snapshot(&mut self, snap: &WorldSnapshot) -> Result<(), MirrorError> {
        if snap.width != self.grid.width() || snap.height != self.grid.height() {
            return Err(MirrorError::DimensionMismatch {
                expected_w: self.grid.width(),
                expected_h: self.grid.height(),
                actual_w: snap.width,
                actual_h: snap.height,
            });
        }
        self.grid = snap.to_grid()?;
        self.players = snap
            .players
            .iter()
            .map(|(id, pos)| (id.clone(), Vec2::from(*pos)))
            .collect();
        self.bootstrapped = true;
        debug!(players = self.players.len(), "Applied world snapshot");
        Ok(())
    }

    /// Applies one incremental event. Returns `None` for events dropped
    /// before bootstrap, out-of-range cells, and non-event messages.
    pub fn apply_event(&mut self, msg: &NetMsg) -> Option<MirrorUpdate> {
        if !self.bootstrapped {
            warn!(tag = ?msg.tag(), "Dropping event received before snapshot");
            return None;
        }
        match msg {
            NetMsg::CellChanged(change) => match self.grid.set(change.x, change.y, change.block_type) {
                Ok(()) => Some(MirrorUpdate::Cell(*change)),
                Err(e) => {
                    warn!(error = %e, "Ignoring cell change");
                    None
                }
            },
            NetMsg::PlayerJoined(p) | NetMsg::PlayerMoved(p) => {
                let position = Vec2::new(p.x, p.y);
                self.players.insert(p.session_id.clone(), position);
                Some(MirrorUpdate::PlayerUpserted {
                    session_id: p.session_id.clone(),
                    position,
                })
            }
            NetMsg::PlayerLeft(p) => {
                self.players.remove(&p.session_id)?;
                Some(MirrorUpdate::PlayerRemoved {
                    session_id: p.session_id.clone(),
                })
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tilesync_shared::{
        config::FULL_HEALTH,
        grid::BlockType,
        net::PlayerLeft,
        sync::{PlayerPos, PlayerState},
    };

    fn snapshot(width: u32, height: u32) -> WorldSnapshot {
        let mut players = BTreeMap::new();
        players.insert("me".to_string(), PlayerPos { x: 48.0, y: 48.0 });
        let mut cells = vec![0; (width * height) as usize];
        cells[1] = 2;
        WorldSnapshot {
            width,
            height,
            cells,
            players,
        }
    }

    fn cell_changed(x: i32, y: i32, block_type: BlockType) -> NetMsg {
        NetMsg::CellChanged(CellChange { x, y, block_type })
    }

    #[test]
    fn events_before_snapshot_are_dropped() {
        let mut m = WorldMirror::new(4, 4);
        assert_eq!(m.apply_event(&cell_changed(0, 0, BlockType::Wood)), None);
        assert_eq!(m.grid().get(0, 0).unwrap().block_type, BlockType::Grass);

        m.apply_snapshot(&snapshot(4, 4)).unwrap();
        assert_eq!(m.grid().get(1, 0).unwrap().block_type, BlockType::Stone);
        assert!(m.apply_event(&cell_changed(0, 0, BlockType::Wood)).is_some());
        let cell = m.grid().get(0, 0).unwrap();
        assert_eq!(cell.block_type, BlockType::Wood);
        assert_eq!(cell.health, FULL_HEALTH);
    }

    #[test]
    fn mismatched_snapshot_is_rejected() {
        let mut m = WorldMirror::new(4, 4);
        assert!(matches!(
            m.apply_snapshot(&snapshot(5, 4)),
            Err(MirrorError::DimensionMismatch { actual_w: 5, .. })
        ));
        assert!(!m.is_bootstrapped());
    }

    #[test]
    fn player_events_update_table() {
        let mut m = WorldMirror::new(4, 4);
        m.apply_snapshot(&snapshot(4, 4)).unwrap();

        let moved = NetMsg::PlayerMoved(PlayerState {
            session_id: "other".into(),
            x: 10.0,
            y: 20.0,
        });
        assert_eq!(
            m.apply_event(&moved),
            Some(MirrorUpdate::PlayerUpserted {
                session_id: "other".into(),
                position: Vec2::new(10.0, 20.0)
            })
        );
        assert_eq!(m.player("other"), Some(Vec2::new(10.0, 20.0)));

        let left = NetMsg::PlayerLeft(PlayerLeft {
            session_id: "other".into(),
        });
        assert!(m.apply_event(&left).is_some());
        assert_eq!(m.player("other"), None);
        assert_eq!(m.apply_event(&left), None);
    }

    #[test]
    fn out_of_range_cell_change_is_ignored() {
        let mut m = WorldMirror::new(4, 4);
        m.apply_snapshot(&snapshot(4, 4)).unwrap();
        let before = m.grid().clone();
        assert_eq!(m.apply_event(&cell_changed(9, 9, BlockType::Wood)), None);
        assert_eq!(m.grid(), &before);
    }
}
