//! Input handling.
//!
//! A windowed client would sample a keyboard here. The headless client
//! samples axis values instead and turns them into the four-flag
//! `InputCommand` the server understands, one per fixed step.

use tilesync_shared::input::InputCommand;

/// Axis magnitude needed before a direction counts as held.
const AXIS_DEADZONE: f32 = 0.5;

/// User input state at a moment in time. `+x` is right, `+y` is down.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct InputState {
    pub move_x: f32,
    pub move_y: f32,
}

impl InputState {
    pub const IDLE: Self = Self {
        move_x: 0.0,
        move_y: 0.0,
    };

    pub fn new(move_x: f32, move_y: f32) -> Self {
        Self { move_x, move_y }
    }
}

/// Turns sampled input into the command for one step.
pub fn build_command(input: InputState) -> InputCommand {
    InputCommand {
        left: input.move_x <= -AXIS_DEADZONE,
        right: input.move_x >= AXIS_DEADZONE,
        up: input.move_y <= -AXIS_DEADZONE,
        down: input.move_y >= AXIS_DEADZONE,
    }
}

/// Walks a square: right, down, left, up, `steps_per_side` steps each.
#[derive(Debug, Clone)]
pub struct ScriptedInput {
    steps_per_side: u32,
    step: u32,
}

impl ScriptedInput {
    pub fn square(steps_per_side: u32) -> Self {
        Self {
            steps_per_side: steps_per_side.max(1),
            step: 0,
        }
    }
}

impl Iterator for ScriptedInput {
    type Item = InputState;

    fn next(&mut self) -> Option<InputState> {
        const SIDES: [(f32, f32); 4] = [(1.0, 0.0), (0.0, 1.0), (-1.0, 0.0), (0.0, -1.0)];
        let side = (self.step / self.steps_per_side) as usize % SIDES.len();
        self.step = self.step.wrapping_add(1);
        let (x, y) = SIDES[side];
        Some(InputState::new(x, y))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadzone_filters_small_axes() {
        assert_eq!(build_command(InputState::new(0.2, -0.4)), InputCommand::IDLE);
        let cmd = build_command(InputState::new(-1.0, 0.7));
        assert!(cmd.left && cmd.down && !cmd.right && !cmd.up);
    }

    #[test]
    fn square_walk_cycles_sides() {
        let dirs: Vec<InputState> = ScriptedInput::square(2).take(9).collect();
        assert_eq!(dirs[0], InputState::new(1.0, 0.0));
        assert_eq!(dirs[2], InputState::new(0.0, 1.0));
        assert_eq!(dirs[5], InputState::new(-1.0, 0.0));
        assert_eq!(dirs[7], InputState::new(0.0, -1.0));
        assert_eq!(dirs[8], InputState::new(1.0, 0.0));
    }
}
