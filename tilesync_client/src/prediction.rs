//! Prediction and reconciliation for the local player.
//!
//! Each client step moves the predicted position with the same resolver the
//! server uses, then pulls it toward the last authoritative position:
//! - beyond the snap threshold it jumps straight there,
//! - beyond the correction threshold it closes a fixed fraction of the gap,
//! - inside the dead zone it stays put.

use tilesync_shared::{
    config::SimConstants,
    input::InputCommand,
    math::Vec2,
    movement::{MovementResolver, TileQuery},
};
use tracing::debug;

/// What reconciliation did on a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Correction {
    None,
    Nudged,
    Snapped,
}

#[derive(Debug, Clone)]
pub struct ReconciliationEngine {
    predicted: Vec2,
    last_authoritative: Vec2,
    resolver: MovementResolver,
    velocity: f32,
    snap_threshold: f32,
    correction_threshold: f32,
    correction_speed: f32,
}

impl ReconciliationEngine {
    pub fn new(start: Vec2) -> Self {
        Self::with_constants(start, &SimConstants::CURRENT)
    }

    pub fn with_constants(start: Vec2, c: &SimConstants) -> Self {
        Self {
            predicted: start,
            last_authoritative: start,
            resolver: MovementResolver::from_constants(c),
            velocity: c.player_velocity,
            snap_threshold: c.snap_threshold,
            correction_threshold: c.correction_threshold,
            correction_speed: c.correction_speed,
        }
    }

    pub fn predicted(&self) -> Vec2 {
        self.predicted
    }

    pub fn last_authoritative(&self) -> Vec2 {
        self.last_authoritative
    }

    /// Stores a server position; it is only consulted on the next step.
    pub fn set_authoritative(&mut self, pos: Vec2) {
        self.last_authoritative = pos;
    }

    /// Applies one local command through the shared resolver.
    pub fn predict(&mut self, cmd: InputCommand, world: &impl TileQuery) {
        self.predicted = self
            .resolver
            .resolve(self.predicted, cmd.delta(self.velocity), world);
    }

    /// Blends the prediction toward the authoritative position.
    pub fn reconcile(&mut self) -> Correction {
        let distance = self.predicted.distance(self.last_authoritative);
        if distance > self.snap_threshold {
            debug!(distance, "Prediction snapped to server position");
            self.predicted = self.last_authoritative;
            Correction::Snapped
        } else if distance > self.correction_threshold {
            self.predicted = self
                .predicted
                .lerp(self.last_authoritative, self.correction_speed);
            Correction::Nudged
        } else {
            Correction::None
        }
    }

    /// One fixed client step: predict, then reconcile.
    pub fn step(&mut self, cmd: InputCommand, world: &impl TileQuery) -> Correction {
        self.predict(cmd, world);
        self.reconcile()
    }
}
