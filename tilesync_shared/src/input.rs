//! Input commands.
//!
//! One `InputCommand` is produced per client step. The server keeps a FIFO per
//! player and flushes it completely on each of its own fixed steps, so a
//! lagging client's backlog is applied command by command, never coalesced.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::math::Vec2;

/// Directional key state for one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InputCommand {
    pub left: bool,
    pub right: bool,
    pub up: bool,
    pub down: bool,
}

impl InputCommand {
    pub const IDLE: Self = Self {
        left: false,
        right: false,
        up: false,
        down: false,
    };

    /// Requested displacement for this command.
    ///
    /// Opposing flags on the same axis cancel to zero on both client and server.
    pub fn delta(self, velocity: f32) -> Vec2 {
        let axis = |neg: bool, pos: bool| match (neg, pos) {
            (true, false) => -velocity,
            (false, true) => velocity,
            _ => 0.0,
        };
        Vec2::new(axis(self.left, self.right), axis(self.up, self.down))
    }
}

/// Per-player FIFO of pending commands.
#[derive(Debug, Clone, Default)]
pub struct InputQueue {
    pending: VecDeque<InputCommand>,
}

impl InputQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, cmd: InputCommand) {
        self.pending.push_back(cmd);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Removes and yields every queued command in submission order.
    pub fn drain(&mut self) -> impl Iterator<Item = InputCommand> + '_ {
        self.pending.drain(..)
    }
}
