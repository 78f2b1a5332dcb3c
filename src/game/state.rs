//! Game State
//!
//! The whole state of one player's field: arena, grid, launcher,
//! compressor, palette and attack bar, plus the seeded PRNG. Everything
//! needed to replay or resync a duel lives here; the tick mutates it,
//! nothing else does.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::attack::AttackBar;
use super::bubble::{Bubble, BubbleArena, BubbleId, BubbleState};
use super::compressor::Compressor;
use super::grid::{cell_origin, Grid, GRID_CELLS, GRID_COLS, GRID_ROWS};
use super::level::{validate, Layout, LevelError};
use super::palette::ColorCounts;
use crate::core::checksum::{Crc16, GridChecksum};
use crate::core::rng::DeterministicRng;

/// Leftmost aim position (units of PI/40 radians).
pub const AIM_MIN: f64 = 1.0;
/// Rightmost aim position.
pub const AIM_MAX: f64 = 39.0;
/// Straight up.
pub const AIM_CENTER: f64 = 20.0;
/// Launcher x.
pub const LAUNCHER_X: f64 = 302.0;
/// Launcher y.
pub const LAUNCHER_Y: f64 = 390.0;
/// Speed of launched and rising bubbles, pixels per update.
pub const BUBBLE_SPEED: f64 = 8.0;

/// Tunables agreed between peers before play.
///
/// Only `collision` and `compressor_enabled` come over the wire in the
/// preferences exchange; the rest are local policy with shared defaults.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GameConfig {
    /// Collision sensitivity added to the bubble radius.
    pub collision: i32,
    /// Whether the compressor advances at all.
    pub compressor_enabled: bool,
    /// Frames without a shot before one is forced.
    pub hurry_delay: u32,
    /// Frames of pending attack credit before a volley rises.
    pub attack_release_delay: u32,
    /// Whether the release timer fires volleys locally. Mirrors of a
    /// remote field turn this off and release only on explicit lanes
    /// from the peer's actions.
    pub auto_release: bool,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            collision: 9,
            compressor_enabled: true,
            hurry_delay: 480,
            attack_release_delay: 40,
            auto_release: true,
        }
    }
}

impl GameConfig {
    /// Squared center distance below which a moving bubble sticks.
    pub fn collision_threshold_sq(&self) -> f64 {
        let d = super::grid::BUBBLE_RADIUS + self.collision as f64;
        d * d
    }
}

/// Where the round stands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GamePhase {
    /// Round in progress.
    Playing,
    /// Field cleared.
    Won,
    /// A bubble crossed the loss line.
    Lost,
}

/// Snapshot restore failures.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// The byte stream was not a valid snapshot.
    #[error("snapshot codec: {0}")]
    Codec(#[from] bincode::Error),
}

/// Complete state of one field.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GameState {
    /// Bubble storage.
    pub arena: BubbleArena,
    /// Cell map into the arena.
    pub grid: Grid,
    /// Remaining-color counts.
    pub palette: ColorCounts,
    /// Launch-cycle compression.
    pub compressor: Compressor,
    /// Row the ceiling currently holds; reachability fills start here.
    /// Moves down with the occupants on a grid shift, back up when a
    /// bubble sticks against the ceiling above it.
    pub anchor_row: u8,
    /// Incoming attack credit.
    pub attack: AttackBar,
    /// The deterministic random stream.
    pub rng: DeterministicRng,
    /// Aim position in [AIM_MIN, AIM_MAX].
    pub aim: f64,
    /// Color loaded in the launcher.
    pub current_color: u8,
    /// Color on deck.
    pub next_color: u8,
    /// The launched bubble in flight, if any.
    pub moving: Option<BubbleId>,
    /// Attack bubbles ascending.
    pub rising: Vec<BubbleId>,
    /// Detached bubbles dropping.
    pub falling: Vec<BubbleId>,
    /// Popped bubbles flying off.
    pub jumping: Vec<BubbleId>,
    /// Frames since the last shot (hurry rule).
    pub frames_since_fire: u32,
    /// Shots fired this round.
    pub launches: u32,
    /// Frame counter.
    pub frame: u32,
    /// Round phase.
    pub phase: GamePhase,
}

impl GameState {
    /// Build a fresh field from a layout and a shared seed.
    pub fn new(seed: u64, layout: &Layout) -> Result<Self, LevelError> {
        validate(layout)?;

        let mut state = Self {
            arena: BubbleArena::new(),
            grid: Grid::new(),
            palette: ColorCounts::new(),
            compressor: Compressor::new(),
            anchor_row: 0,
            attack: AttackBar::new(),
            rng: DeterministicRng::new(seed),
            aim: AIM_CENTER,
            current_color: 0,
            next_color: 0,
            moving: None,
            rising: Vec::new(),
            falling: Vec::new(),
            jumping: Vec::new(),
            frames_since_fire: 0,
            launches: 0,
            frame: 0,
            phase: GamePhase::Playing,
        };

        for (row, cols) in layout.iter().enumerate() {
            for (col, &value) in cols.iter().enumerate() {
                if value >= 0 {
                    let _ = state.insert_fixed(value as u8, col as u8, row as u8);
                }
            }
        }

        state.current_color = state.palette.draw(&mut state.rng).unwrap_or(0);
        state.next_color = state.palette.draw(&mut state.rng).unwrap_or(0);
        Ok(state)
    }

    /// Vertical push from compression.
    pub fn offset(&self) -> f64 {
        self.compressor.offset()
    }

    /// First row at or past the loss line.
    pub fn loss_row(&self) -> u8 {
        self.compressor.loss_row()
    }

    /// Put a fixed bubble into a cell, updating grid and palette.
    ///
    /// Returns the id, or None when the cell was already owned; the
    /// caller treats that as a tracking desync, not a panic.
    pub fn insert_fixed(&mut self, color: u8, col: u8, row: u8) -> Option<BubbleId> {
        if self.grid.get(col, row).is_some() {
            return None;
        }
        let (x, y) = cell_origin(col, row, self.offset());
        let id = self.arena.insert(Bubble::fixed(color, (col, row), x, y));
        let _ = self.grid.set(col, row, id);
        self.palette.add(color);
        Some(id)
    }

    /// Pull a fixed bubble out of its cell, updating grid and palette.
    /// The bubble stays in the arena; the caller re-purposes it.
    pub fn detach_fixed(&mut self, id: BubbleId) -> bool {
        let Some((col, row)) = self.arena.get(id).and_then(|b| b.cell) else {
            return false;
        };
        let _ = self.grid.take(col, row);
        let Some(bubble) = self.arena.get_mut(id) else {
            return false;
        };
        bubble.cell = None;
        self.palette.remove(bubble.color)
    }

    /// Exchange launcher colors.
    pub fn swap_colors(&mut self) {
        std::mem::swap(&mut self.current_color, &mut self.next_color);
    }

    /// Nudge the aim, clamped to the launcher's arc.
    pub fn move_aim(&mut self, delta: f64) {
        self.set_aim(self.aim + delta);
    }

    /// Set the aim, clamped to the launcher's arc.
    pub fn set_aim(&mut self, position: f64) {
        self.aim = position.clamp(AIM_MIN, AIM_MAX);
    }

    /// Grid colors in wire order (column-major), -1 for empty cells.
    pub fn grid_colors(&self) -> [i8; GRID_CELLS] {
        let mut colors = [-1i8; GRID_CELLS];
        for (col, row, id) in self.grid.iter_occupied() {
            if let Some(bubble) = self.arena.get(id) {
                colors[col as usize * GRID_ROWS + row as usize] = bubble.color as i8;
            }
        }
        colors
    }

    /// 16-bit digest of the synchronized state: grid colors in wire
    /// order plus the compressor step. Never returns the wire's "not
    /// yet computed" zero.
    pub fn checksum(&self) -> GridChecksum {
        let mut crc = Crc16::new();
        for &color in self.grid_colors().iter() {
            crc.update_u8(color as u8);
        }
        crc.update_u8(self.compressor.steps());
        match crc.finalize() {
            0 => 0xFFFF,
            c => c,
        }
    }

    /// Rebuild the field from a peer's snapshot.
    ///
    /// Everything transient (moving, detached, rising) is dropped; the
    /// peer's grid is authoritative from here on.
    pub fn apply_field(
        &mut self,
        steps: u8,
        current_color: i8,
        next_color: i8,
        attack_pending: u16,
        colors: &[i8; GRID_CELLS],
    ) {
        self.arena.clear();
        self.grid.clear();
        self.palette.clear();
        self.moving = None;
        self.rising.clear();
        self.falling.clear();
        self.jumping.clear();

        self.compressor.set_steps(steps);
        for col in 0..GRID_COLS as u8 {
            for row in 0..GRID_ROWS as u8 {
                let color = colors[col as usize * GRID_ROWS + row as usize];
                if color >= 0 {
                    let _ = self.insert_fixed(color as u8, col, row);
                }
            }
        }

        // The snapshot carries no anchor; the topmost occupied row is
        // the one the ceiling holds.
        self.anchor_row = self
            .grid
            .iter_occupied()
            .map(|(_, row, _)| row)
            .min()
            .unwrap_or(0);

        self.current_color = if current_color >= 0 {
            current_color as u8
        } else {
            self.palette.draw(&mut self.rng).unwrap_or(0)
        };
        self.next_color = if next_color >= 0 {
            next_color as u8
        } else {
            self.palette.draw(&mut self.rng).unwrap_or(0)
        };
        self.attack.set_pending(attack_pending);
        self.phase = GamePhase::Playing;
    }

    /// Check the occupancy invariant: palette totals match grid
    /// occupancy, every occupied cell resolves to a fixed bubble that
    /// agrees on its own cell, and no id owns two cells.
    pub fn verify_tracking(&self) -> bool {
        if self.palette.total() != self.grid.occupied() as u32 {
            return false;
        }
        let mut seen: Vec<u32> = Vec::with_capacity(self.grid.occupied());
        for (col, row, id) in self.grid.iter_occupied() {
            match self.arena.get(id) {
                Some(bubble)
                    if bubble.state == BubbleState::Fixed && bubble.cell == Some((col, row)) => {}
                _ => return false,
            }
            seen.push(id.index() as u32);
        }
        seen.sort_unstable();
        seen.windows(2).all(|w| w[0] != w[1])
    }

    /// Serialize for suspend.
    pub fn to_snapshot_bytes(&self) -> Result<Vec<u8>, SnapshotError> {
        Ok(bincode::serialize(self)?)
    }

    /// Restore a suspended game.
    pub fn from_snapshot_bytes(bytes: &[u8]) -> Result<Self, SnapshotError> {
        Ok(bincode::deserialize(bytes)?)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::level::DEFAULT_LAYOUT;

    #[test]
    fn test_new_game_occupancy() {
        let state = GameState::new(1, &DEFAULT_LAYOUT).unwrap();

        // 8 + 7 + 8 + 7 starting bubbles
        assert_eq!(state.grid.occupied(), 30);
        assert_eq!(state.palette.total(), 30);
        assert!(state.verify_tracking());
        assert_eq!(state.phase, GamePhase::Playing);
    }

    #[test]
    fn test_same_seed_same_launcher_colors() {
        let a = GameState::new(99, &DEFAULT_LAYOUT).unwrap();
        let b = GameState::new(99, &DEFAULT_LAYOUT).unwrap();

        assert_eq!(a.current_color, b.current_color);
        assert_eq!(a.next_color, b.next_color);
        assert_eq!(a.checksum(), b.checksum());
    }

    #[test]
    fn test_checksum_tracks_grid() {
        let mut state = GameState::new(5, &DEFAULT_LAYOUT).unwrap();
        let before = state.checksum();
        assert_ne!(before, 0);

        let _ = state.insert_fixed(3, 4, 6);
        assert_ne!(state.checksum(), before);
    }

    #[test]
    fn test_insert_fixed_refuses_owned_cell() {
        let mut state = GameState::new(5, &DEFAULT_LAYOUT).unwrap();
        assert!(state.insert_fixed(2, 0, 0).is_none());
    }

    #[test]
    fn test_apply_field_roundtrip() {
        let source = GameState::new(31, &DEFAULT_LAYOUT).unwrap();
        let mut target = GameState::new(77, &DEFAULT_LAYOUT).unwrap();
        let _ = target.insert_fixed(0, 3, 7);
        assert_ne!(target.checksum(), source.checksum());

        target.apply_field(
            source.compressor.steps(),
            source.current_color as i8,
            source.next_color as i8,
            source.attack.pending(),
            &source.grid_colors(),
        );

        assert_eq!(target.checksum(), source.checksum());
        assert_eq!(target.current_color, source.current_color);
        assert_eq!(target.anchor_row, 0);
        assert!(target.verify_tracking());
    }

    #[test]
    fn test_verify_tracking_detects_drift() {
        let mut state = GameState::new(5, &DEFAULT_LAYOUT).unwrap();
        assert!(state.verify_tracking());

        // Extra palette count with no grid backing
        state.palette.add(0);
        assert!(!state.verify_tracking());
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let mut state = GameState::new(13, &DEFAULT_LAYOUT).unwrap();
        state.move_aim(3.5);
        state.attack.add(4);

        let bytes = state.to_snapshot_bytes().unwrap();
        let restored = GameState::from_snapshot_bytes(&bytes).unwrap();

        assert_eq!(restored.checksum(), state.checksum());
        assert_eq!(restored.aim, state.aim);
        assert_eq!(restored.attack.pending(), state.attack.pending());
        assert_eq!(restored.rng.state(), state.rng.state());
    }

    #[test]
    fn test_aim_clamped() {
        let mut state = GameState::new(5, &DEFAULT_LAYOUT).unwrap();
        state.move_aim(1000.0);
        assert_eq!(state.aim, AIM_MAX);
        state.move_aim(-1000.0);
        assert_eq!(state.aim, AIM_MIN);
    }
}
