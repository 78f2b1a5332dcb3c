//! Remaining-Color Bookkeeping
//!
//! Tracks how many fixed bubbles of each color remain. The launcher only
//! offers colors that are still on the field, weighted by remaining
//! count: a color with ten bubbles left is ten times as likely as a color
//! with one. The totals double as the tracked-count side of the grid
//! occupancy invariant.

use serde::{Deserialize, Serialize};

use super::bubble::NUM_COLORS;
use crate::core::rng::DeterministicRng;

/// Per-color counts of fixed bubbles.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ColorCounts {
    counts: [u16; NUM_COLORS as usize],
}

impl ColorCounts {
    /// All zeros.
    pub fn new() -> Self {
        Self::default()
    }

    /// Count for one color.
    pub fn count(&self, color: u8) -> u16 {
        self.counts[color as usize]
    }

    /// Total fixed bubbles tracked.
    pub fn total(&self) -> u32 {
        self.counts.iter().map(|&c| c as u32).sum()
    }

    /// Record a bubble entering the grid.
    pub fn add(&mut self, color: u8) {
        self.counts[color as usize] += 1;
    }

    /// Record a bubble leaving the grid.
    ///
    /// Returns false on underflow, which means tracking has already
    /// diverged from the grid; the caller reports a desync rather than
    /// panicking.
    pub fn remove(&mut self, color: u8) -> bool {
        let slot = &mut self.counts[color as usize];
        if *slot == 0 {
            return false;
        }
        *slot -= 1;
        true
    }

    /// Colors with at least one bubble left, ascending.
    pub fn colors_in_play(&self) -> Vec<u8> {
        (0..NUM_COLORS).filter(|&c| self.count(c) > 0).collect()
    }

    /// Draw a color weighted by remaining count.
    ///
    /// Uniform over remaining bubble instances, not over colors. Returns
    /// None when the field is empty.
    pub fn draw(&self, rng: &mut DeterministicRng) -> Option<u8> {
        let total = self.total();
        if total == 0 {
            return None;
        }
        let mut pick = rng.next_int(total);
        for color in 0..NUM_COLORS {
            let n = self.count(color) as u32;
            if pick < n {
                return Some(color);
            }
            pick -= n;
        }
        None
    }

    /// Forget everything (field snapshot rebuild).
    pub fn clear(&mut self) {
        self.counts = [0; NUM_COLORS as usize];
    }
}

// =============================================================================
// TESTS
// =============================================================================
