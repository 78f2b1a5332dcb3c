//! Grid Compression
//!
//! Every eight launches that stick, the compressor advances one step,
//! lowering the loss line by one row. When it reaches step 8 the whole
//! grid shifts down a physical row and the counter starts over. The step
//! count travels in field snapshots, so it is part of synchronized state.

use serde::{Deserialize, Serialize};

use super::grid::{GRID_ROWS, ROW_HEIGHT};

/// Launches per compression step.
pub const LAUNCHES_PER_STEP: u8 = 8;

/// Steps before the grid physically shifts a row.
pub const STEPS_PER_SHIFT: u8 = 8;

/// Compressor state: the launch cycle plus the current step count.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Compressor {
    steps: u8,
    launches: u8,
}

/// What a registered launch did to the compressor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompressorAdvance {
    /// Cycle still in progress.
    None,
    /// Step count advanced.
    Stepped,
    /// Step count wrapped; the caller must shift the grid one row and
    /// re-evaluate loss in the same frame.
    Shifted,
}

impl Compressor {
    /// Fresh compressor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current step count, 0..STEPS_PER_SHIFT.
    pub fn steps(&self) -> u8 {
        self.steps
    }

    /// Restore the step count from a field snapshot.
    pub fn set_steps(&mut self, steps: u8) {
        self.steps = steps.min(STEPS_PER_SHIFT - 1);
        self.launches = 0;
    }

    /// Vertical push applied to every cell, in pixels.
    pub fn offset(&self) -> f64 {
        self.steps as f64 * ROW_HEIGHT
    }

    /// First row at or past the loss line.
    pub fn loss_row(&self) -> u8 {
        (GRID_ROWS as u8 - 1) - self.steps
    }

    /// Record a launch that stuck. Returns what happened.
    pub fn register_launch(&mut self) -> CompressorAdvance {
        self.launches += 1;
        if self.launches < LAUNCHES_PER_STEP {
            return CompressorAdvance::None;
        }
        self.launches = 0;
        self.steps += 1;
        if self.steps == STEPS_PER_SHIFT {
            self.steps = 0;
            CompressorAdvance::Shifted
        } else {
            CompressorAdvance::Stepped
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_every_eight_launches() {
        let mut c = Compressor::new();

        for _ in 0..7 {
            assert_eq!(c.register_launch(), CompressorAdvance::None);
        }
        assert_eq!(c.register_launch(), CompressorAdvance::Stepped);
        assert_eq!(c.steps(), 1);
        assert_eq!(c.offset(), ROW_HEIGHT);
        assert_eq!(c.loss_row(), 11);
    }

    #[test]
    fn test_shift_on_eighth_step() {
        let mut c = Compressor::new();
        c.set_steps(7);
        assert_eq!(c.loss_row(), 5);

        for _ in 0..7 {
            assert_eq!(c.register_launch(), CompressorAdvance::None);
        }
        assert_eq!(c.register_launch(), CompressorAdvance::Shifted);

        // Counter restarts after the physical shift
        assert_eq!(c.steps(), 0);
        assert_eq!(c.loss_row(), 12);
    }
}
