//! Bubble Lifecycle and Arena Storage
//!
//! Bubbles are stored in an arena and addressed by copyable ids. The grid
//! and the in-flight lists hold ids, never references, so the tick can
//! mutate freely without aliasing problems. Iteration order over the
//! arena is slot order, which is deterministic.

use serde::{Deserialize, Serialize};

/// Number of distinct bubble colors.
pub const NUM_COLORS: u8 = 8;

/// Handle into a [`BubbleArena`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BubbleId(u32);

impl BubbleId {
    /// Raw slot index.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Where a bubble is in its life.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BubbleState {
    /// Fired from the launcher, in flight.
    Launched,
    /// Attack bubble ascending from below the field.
    Rising,
    /// Snapped into a grid cell.
    Fixed,
    /// Detached from the ceiling, dropping straight down.
    Falling,
    /// Popped as part of a cluster, flying off with an impulse.
    Jumping,
}

/// A single bubble.
///
/// Positions are field pixels (sprite origin, matching the classic
/// 32-pixel sprites); `cell` is only meaningful in the `Fixed` state.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Bubble {
    /// Color index, 0..NUM_COLORS.
    pub color: u8,
    /// Lifecycle state.
    pub state: BubbleState,
    /// Horizontal position.
    pub x: f64,
    /// Vertical position.
    pub y: f64,
    /// Horizontal velocity per update.
    pub vx: f64,
    /// Vertical velocity per update.
    pub vy: f64,
    /// Occupied cell (col, row) while fixed.
    pub cell: Option<(u8, u8)>,
    /// Flood-fill visit mark, reset before every traversal.
    pub checked: bool,
}

impl Bubble {
    /// A fixed bubble sitting in a cell.
    pub fn fixed(color: u8, cell: (u8, u8), x: f64, y: f64) -> Self {
        Self {
            color,
            state: BubbleState::Fixed,
            x,
            y,
            vx: 0.0,
            vy: 0.0,
            cell: Some(cell),
            checked: false,
        }
    }

    /// A moving bubble (launched or rising).
    pub fn moving(color: u8, state: BubbleState, x: f64, y: f64, vx: f64, vy: f64) -> Self {
        Self {
            color,
            state,
            x,
            y,
            vx,
            vy,
            cell: None,
            checked: false,
        }
    }
}

/// Slotted arena of bubbles.
///
/// Freed slots are recycled, so ids are only valid until removal. Ids are
/// never exchanged between peers; the wire carries grid colors, not ids.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BubbleArena {
    slots: Vec<Option<Bubble>>,
    free: Vec<u32>,
}

impl BubbleArena {
    /// Empty arena.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a bubble and return its id.
    pub fn insert(&mut self, bubble: Bubble) -> BubbleId {
        if let Some(slot) = self.free.pop() {
            self.slots[slot as usize] = Some(bubble);
            BubbleId(slot)
        } else {
            self.slots.push(Some(bubble));
            BubbleId((self.slots.len() - 1) as u32)
        }
    }

    /// Remove a bubble, returning it if the id was live.
    pub fn remove(&mut self, id: BubbleId) -> Option<Bubble> {
        let bubble = self.slots.get_mut(id.index())?.take();
        if bubble.is_some() {
            self.free.push(id.0);
        }
        bubble
    }

    /// Shared access.
    pub fn get(&self, id: BubbleId) -> Option<&Bubble> {
        self.slots.get(id.index())?.as_ref()
    }

    /// Mutable access.
    pub fn get_mut(&mut self, id: BubbleId) -> Option<&mut Bubble> {
        self.slots.get_mut(id.index())?.as_mut()
    }

    /// Number of live bubbles.
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// True when no bubble is live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate live bubbles in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (BubbleId, &Bubble)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|b| (BubbleId(i as u32), b)))
    }

    /// Iterate live bubbles mutably in slot order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (BubbleId, &mut Bubble)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_mut().map(|b| (BubbleId(i as u32), b)))
    }

    /// Drop every bubble.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_remove_reuse() {
        let mut arena = BubbleArena::new();

        let a = arena.insert(Bubble::fixed(0, (0, 0), 190.0, 44.0));
        let b = arena.insert(Bubble::fixed(1, (1, 0), 222.0, 44.0));
        assert_eq!(arena.len(), 2);

        let removed = arena.remove(a).unwrap();
        assert_eq!(removed.color, 0);
        assert_eq!(arena.len(), 1);

        // Freed slot is recycled
        let c = arena.insert(Bubble::fixed(2, (2, 0), 254.0, 44.0));
        assert_eq!(c.index(), a.index());
        assert_ne!(c.index(), b.index());

        // Double remove is a no-op
        assert!(arena.remove(a).is_some());
        assert!(arena.remove(a).is_none());
        let _ = arena.get(b);
    }

    #[test]
    fn test_iter_slot_order() {
        let mut arena = BubbleArena::new();
        for color in 0..4 {
            arena.insert(Bubble::fixed(color, (color, 0), 0.0, 0.0));
        }

        let colors: Vec<u8> = arena.iter().map(|(_, b)| b.color).collect();
        assert_eq!(colors, vec![0, 1, 2, 3]);
    }
}
