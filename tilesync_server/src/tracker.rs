//! Per-tick dirty tracking for state sync.
//!
//! Cell edits and join/leave notices are kept in the order they happened.
//! Player movement is tracked as a dirty set and resolved to the player's
//! position at drain time, so one event is sent per moved player no matter
//! how many commands moved it.

use std::collections::{BTreeMap, BTreeSet};

use tilesync_shared::{
    math::Vec2,
    sync::{CellChange, PlayerState, SessionId, SyncEvent},
};

use crate::simulation::Player;

#[derive(Debug, Default)]
pub struct ChangeTracker {
    ordered: Vec<SyncEvent>,
    moved: BTreeSet<SessionId>,
}

impl ChangeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cell_changed(&mut self, change: CellChange) {
        self.ordered.push(SyncEvent::CellChanged(change));
    }

    pub fn player_joined(&mut self, session_id: &SessionId, pos: Vec2) {
        self.ordered.push(SyncEvent::PlayerJoined(PlayerState {
            session_id: session_id.clone(),
            x: pos.x,
            y: pos.y,
        }));
    }

    pub fn player_left(&mut self, session_id: &SessionId) {
        self.moved.remove(session_id);
        self.ordered.push(SyncEvent::PlayerLeft {
            session_id: session_id.clone(),
        });
    }

    pub fn player_moved(&mut self, session_id: SessionId) {
        self.moved.insert(session_id);
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty() && self.moved.is_empty()
    }

    /// Takes every pending event: ordered events first, then one
    /// `PlayerMoved` per dirty player still present.
    pub fn drain(&mut self, players: &BTreeMap<SessionId, Player>) -> Vec<SyncEvent> {
        let mut events = std::mem::take(&mut self.ordered);
        for id in std::mem::take(&mut self.moved) {
            if let Some(player) = players.get(&id) {
                events.push(SyncEvent::PlayerMoved(PlayerState {
                    session_id: id,
                    x: player.position.x,
                    y: player.position.y,
                }));
            }
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tilesync_shared::grid::BlockType;

    #[test]
    fn moves_collapse_to_latest_position() {
        let mut players = BTreeMap::new();
        players.insert("p".to_string(), Player::new(Vec2::new(1.0, 1.0)));
        let mut tracker = ChangeTracker::new();

        tracker.player_moved("p".to_string());
        players.get_mut("p").unwrap().position = Vec2::new(9.0, 9.0);
        tracker.player_moved("p".to_string());

        let events = tracker.drain(&players);
        assert_eq!(
            events,
            vec![SyncEvent::PlayerMoved(PlayerState {
                session_id: "p".into(),
                x: 9.0,
                y: 9.0
            })]
        );
        assert!(tracker.is_empty());
    }

    #[test]
    fn ordered_events_precede_moves() {
        let mut players = BTreeMap::new();
        players.insert("p".to_string(), Player::new(Vec2::ZERO));
        let mut tracker = ChangeTracker::new();

        tracker.player_moved("p".to_string());
        tracker.cell_changed(CellChange {
            x: 1,
            y: 1,
            block_type: BlockType::Wood,
        });
        tracker.player_left(&"gone".to_string());

        let events = tracker.drain(&players);
        assert!(matches!(events[0], SyncEvent::CellChanged(_)));
        assert!(matches!(events[1], SyncEvent::PlayerLeft { .. }));
        assert!(matches!(events[2], SyncEvent::PlayerMoved(_)));
    }

    #[test]
    fn leaving_player_drops_pending_move() {
        let players = BTreeMap::new();
        let mut tracker = ChangeTracker::new();
        tracker.player_moved("p".to_string());
        tracker.player_left(&"p".to_string());
        assert_eq!(tracker.drain(&players).len(), 1);
    }
}
