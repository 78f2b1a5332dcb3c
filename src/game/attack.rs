//! Attack Bar and Rising Volleys
//!
//! Popping more than three bubbles credits the excess to the opponent's
//! attack bar. Once credit is pending and the release timer elapses, up
//! to fifteen bubbles rise from below the field, one per lane, lanes
//! chosen without replacement and colors drawn uniformly from the colors
//! still in play on the receiving field.

use serde::{Deserialize, Serialize};

use crate::core::rng::DeterministicRng;

/// Lanes a volley can use. The field is 14 half-cells wide, giving 15
/// distinct x positions at half-cell spacing.
pub const ATTACK_LANES: usize = 15;

/// A volley: one optional color per lane, -1 meaning the lane is empty.
pub type Volley = [i8; ATTACK_LANES];

/// Pending attack credit plus the release timer.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AttackBar {
    pending: u16,
    timer: u32,
}

impl AttackBar {
    /// Empty bar.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bubbles waiting to be released.
    pub fn pending(&self) -> u16 {
        self.pending
    }

    /// Credit the bar. Resets the release timer so a fresh strike always
    /// grants a grace period.
    pub fn add(&mut self, count: u16) {
        if count > 0 {
            self.pending += count;
            self.timer = 0;
        }
    }

    /// Replace the pending count (field snapshot restore).
    pub fn set_pending(&mut self, count: u16) {
        self.pending = count;
        self.timer = 0;
    }

    /// Advance one frame. True when a volley is due.
    pub fn advance(&mut self, release_delay: u32) -> bool {
        if self.pending == 0 {
            self.timer = 0;
            return false;
        }
        self.timer += 1;
        self.timer >= release_delay
    }

    /// Build the due volley and consume its credit.
    ///
    /// Lanes are picked without replacement; colors are uniform over
    /// `colors_in_play`. With no colors in play (field already cleared)
    /// nothing is released and the credit is dropped.
    pub fn take_volley(&mut self, rng: &mut DeterministicRng, colors_in_play: &[u8]) -> Volley {
        let mut volley: Volley = [-1; ATTACK_LANES];
        let count = (self.pending as usize).min(ATTACK_LANES);
        self.pending -= count as u16;
        self.timer = 0;

        if colors_in_play.is_empty() {
            return volley;
        }

        let mut lanes: [usize; ATTACK_LANES] = [0; ATTACK_LANES];
        for (i, lane) in lanes.iter_mut().enumerate() {
            *lane = i;
        }
        rng.shuffle(&mut lanes);

        for &lane in lanes.iter().take(count) {
            if let Some(&color) = rng.choose(colors_in_play) {
                volley[lane] = color as i8;
            }
        }
        volley
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer_only_runs_with_credit() {
        let mut bar = AttackBar::new();
        assert!(!bar.advance(3));
        assert!(!bar.advance(3));

        bar.add(2);
        assert!(!bar.advance(3));
        assert!(!bar.advance(3));
        assert!(bar.advance(3));
    }

    #[test]
    fn test_new_credit_resets_timer() {
        let mut bar = AttackBar::new();
        bar.add(1);
        assert!(!bar.advance(3));
        assert!(!bar.advance(3));
        bar.add(1);
        assert!(!bar.advance(3));
        assert!(!bar.advance(3));
        assert!(bar.advance(3));
    }

    #[test]
    fn test_volley_lanes_unique_and_colored() {
        let mut bar = AttackBar::new();
        bar.add(9);

        let mut rng = DeterministicRng::new(42);
        let volley = bar.take_volley(&mut rng, &[0, 3, 4]);

        let filled: Vec<i8> = volley.iter().copied().filter(|&c| c >= 0).collect();
        assert_eq!(filled.len(), 9);
        assert!(filled.iter().all(|&c| c == 0 || c == 3 || c == 4));
        assert_eq!(bar.pending(), 0);
    }

    #[test]
    fn test_volley_caps_at_lane_count() {
        let mut bar = AttackBar::new();
        bar.add(20);

        let mut rng = DeterministicRng::new(7);
        let volley = bar.take_volley(&mut rng, &[1]);

        assert!(volley.iter().all(|&c| c == 1));
        assert_eq!(bar.pending(), 5);
    }

    #[test]
    fn test_volley_without_colors_drops_credit() {
        let mut bar = AttackBar::new();
        bar.add(4);

        let mut rng = DeterministicRng::new(7);
        let volley = bar.take_volley(&mut rng, &[]);

        assert_eq!(volley, [-1; ATTACK_LANES]);
        assert_eq!(bar.pending(), 0);
    }
}
