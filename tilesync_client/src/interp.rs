//! Interpolation.
//!
//! The server sends absolute positions for remote players whenever they move.
//! The client does not predict them; each step the displayed position closes
//! a fixed fraction of the distance to the latest received target.

use std::collections::BTreeMap;

use tilesync_shared::{config::INTERPOLATION_SPEED, math::Vec2, sync::SessionId};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RemotePlayer {
    pub display: Vec2,
    pub target: Vec2,
}

impl RemotePlayer {
    /// New players appear at their target.
    pub fn new(pos: Vec2) -> Self {
        Self {
            display: pos,
            target: pos,
        }
    }

    pub fn step(&mut self, speed: f32) {
        self.display = self.display.lerp(self.target, speed);
    }
}

/// Every remote player the client knows about.
#[derive(Debug, Clone)]
pub struct RemotePlayers {
    players: BTreeMap<SessionId, RemotePlayer>,
    speed: f32,
}

impl Default for RemotePlayers {
    fn default() -> Self {
        Self::new(INTERPOLATION_SPEED)
    }
}

impl RemotePlayers {
    pub fn new(speed: f32) -> Self {
        Self {
            players: BTreeMap::new(),
            speed,
        }
    }

    /// Returns the number of remote players.
    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn clear(&mut self) {
        self.players.clear();
    }

    /// Sets a player's target, inserting it at the target if unknown.
    pub fn set_target(&mut self, session_id: &str, pos: Vec2) {
        match self.players.get_mut(session_id) {
            Some(p) => p.target = pos,
            None => {
                self.players
                    .insert(session_id.to_string(), RemotePlayer::new(pos));
            }
        }
    }

    pub fn remove(&mut self, session_id: &str) -> bool {
        self.players.remove(session_id).is_some()
    }

    pub fn get(&self, session_id: &str) -> Option<&RemotePlayer> {
        self.players.get(session_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SessionId, &RemotePlayer)> {
        self.players.iter()
    }

    pub fn step(&mut self) {
        for p in self.players.values_mut() {
            p.step(self.speed);
        }
    }
}
