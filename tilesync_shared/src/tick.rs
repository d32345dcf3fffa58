//! Fixed-timestep scheduling.
//!
//! Wall-clock frame deltas are accumulated and converted into whole
//! simulation steps of constant length. Under load several steps can run in
//! one frame; a partial step never runs. Time is kept as `Duration` so step
//! counting is exact integer arithmetic rather than float subtraction.

use std::time::Duration;

use crate::config;

#[derive(Debug, Clone)]
pub struct TickScheduler {
    step: Duration,
    accumulator: Duration,
    ticks: u64,
}

impl TickScheduler {
    pub fn new(step: Duration) -> Self {
        Self {
            step,
            accumulator: Duration::ZERO,
            ticks: 0,
        }
    }

    pub fn step(&self) -> Duration {
        self.step
    }

    /// Unconsumed time carried into the next frame.
    pub fn accumulator(&self) -> Duration {
        self.accumulator
    }

    /// Total steps run so far.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Adds a frame delta and runs `on_step` once per whole step.
    ///
    /// Returns the number of steps run.
    pub fn advance(&mut self, delta: Duration, mut on_step: impl FnMut()) -> u32 {
        self.accumulator += delta;
        let mut steps = 0;
        while self.accumulator >= self.step {
            self.accumulator -= self.step;
            self.ticks += 1;
            steps += 1;
            on_step();
        }
        steps
    }
}

impl Default for TickScheduler {
    fn default() -> Self {
        Self::new(config::fixed_time_step())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifty_ms_frame_runs_three_steps() {
        let mut sched = TickScheduler::default();
        let mut calls = 0;
        let steps = sched.advance(Duration::from_millis(50), || calls += 1);

        assert_eq!(steps, 3);
        assert_eq!(calls, 3);
        assert!(sched.accumulator() < Duration::from_micros(10));
        assert!(sched.accumulator() > Duration::ZERO);
    }

    #[test]
    fn short_frames_accumulate_until_a_whole_step() {
        let mut sched = TickScheduler::new(Duration::from_millis(16));
        assert_eq!(sched.advance(Duration::from_millis(10), || {}), 0);
        assert_eq!(sched.accumulator(), Duration::from_millis(10));
        assert_eq!(sched.advance(Duration::from_millis(10), || {}), 1);
        assert_eq!(sched.accumulator(), Duration::from_millis(4));
        assert_eq!(sched.ticks(), 1);
    }

    #[test]
    fn long_stall_catches_up() {
        let mut sched = TickScheduler::new(Duration::from_millis(10));
        assert_eq!(sched.advance(Duration::from_millis(105), || {}), 10);
        assert_eq!(sched.accumulator(), Duration::from_millis(5));
    }
}
