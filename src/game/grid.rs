//! Hex-Offset Grid and Field Geometry
//!
//! The field is 8 columns by 13 rows. Odd rows sit half a cell to the
//! left, which puts their leftmost cell outside the wall, so they hold
//! 7 usable columns (1..=7). All geometry is expressed in field pixels
//! with the classic constants: cells are 32 wide, rows 28 tall, the
//! ceiling sits at y=44 and the walls at x=190 and x=414.

use serde::{Deserialize, Serialize};

use super::bubble::BubbleId;

/// Columns in the grid.
pub const GRID_COLS: usize = 8;
/// Rows in the grid.
pub const GRID_ROWS: usize = 13;
/// Cells in the wire representation.
pub const GRID_CELLS: usize = GRID_COLS * GRID_ROWS;

/// X of the left wall.
pub const FIELD_LEFT: f64 = 190.0;
/// X of the right wall.
pub const FIELD_RIGHT: f64 = 414.0;
/// Y of the ceiling before any compression.
pub const FIELD_TOP: f64 = 44.0;
/// Cell width.
pub const COL_WIDTH: f64 = 32.0;
/// Row height.
pub const ROW_HEIGHT: f64 = 28.0;
/// Horizontal shift of odd rows.
pub const ODD_ROW_SHIFT: f64 = 16.0;
/// Bubble radius used to derive the collision threshold.
pub const BUBBLE_RADIUS: f64 = 20.0;
/// Y below which detached bubbles despawn.
pub const FIELD_BOTTOM: f64 = 680.0;

/// Pixel origin of a cell, given the current compression offset.
#[inline]
pub fn cell_origin(col: u8, row: u8, offset: f64) -> (f64, f64) {
    let x = FIELD_LEFT + col as f64 * COL_WIDTH - (row % 2) as f64 * ODD_ROW_SHIFT;
    let y = FIELD_TOP + row as f64 * ROW_HEIGHT + offset;
    (x, y)
}

/// Cell a free position maps onto, given the current compression offset.
///
/// The row may exceed the last grid row for positions below the field;
/// callers decide whether that means "no cell yet" or "lost".
#[inline]
pub fn nearest_cell(x: f64, y: f64, offset: f64) -> (i32, i32) {
    // Row bands are shifted up 16 px relative to cell origins, so a
    // position maps to the row whose bubble it visually overlaps most.
    let row = ((y - offset - ROW_HEIGHT) / ROW_HEIGHT).floor() as i32;
    let row = row.max(0);
    let col = ((x - (FIELD_LEFT - ODD_ROW_SHIFT)) / COL_WIDTH + 0.5 * (row % 2) as f64).floor()
        as i32;
    (col.clamp(0, GRID_COLS as i32 - 1), row)
}

/// The 8x13 cell map. Cells hold arena ids; colors live on the bubbles.
///
/// Stored column-major to match the wire layout of field snapshots.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Grid {
    cells: [[Option<BubbleId>; GRID_ROWS]; GRID_COLS],
}

impl Grid {
    /// Empty grid.
    pub fn new() -> Self {
        Self::default()
    }

    /// True when (col, row) is inside the grid.
    #[inline]
    pub fn in_bounds(col: i32, row: i32) -> bool {
        (0..GRID_COLS as i32).contains(&col) && (0..GRID_ROWS as i32).contains(&row)
    }

    /// Occupant of a cell.
    #[inline]
    pub fn get(&self, col: u8, row: u8) -> Option<BubbleId> {
        self.cells[col as usize][row as usize]
    }

    /// Place an id into a cell, returning the previous occupant.
    #[inline]
    pub fn set(&mut self, col: u8, row: u8, id: BubbleId) -> Option<BubbleId> {
        self.cells[col as usize][row as usize].replace(id)
    }

    /// Empty a cell, returning the occupant.
    #[inline]
    pub fn take(&mut self, col: u8, row: u8) -> Option<BubbleId> {
        self.cells[col as usize][row as usize].take()
    }

    /// Remove everything.
    pub fn clear(&mut self) {
        self.cells = Default::default();
    }

    /// Number of occupied cells.
    pub fn occupied(&self) -> usize {
        self.cells
            .iter()
            .flat_map(|col| col.iter())
            .filter(|c| c.is_some())
            .count()
    }

    /// True when no cell is occupied.
    pub fn is_empty(&self) -> bool {
        self.occupied() == 0
    }

    /// Iterate occupied cells column-major (wire order).
    pub fn iter_occupied(&self) -> impl Iterator<Item = (u8, u8, BubbleId)> + '_ {
        self.cells.iter().enumerate().flat_map(|(col, rows)| {
            rows.iter()
                .enumerate()
                .filter_map(move |(row, cell)| cell.map(|id| (col as u8, row as u8, id)))
        })
    }

    /// The six hex neighbors of a cell, parity-dependent.
    ///
    /// Even rows reach up-right and down-right diagonals; odd rows reach
    /// up-left and down-left, mirroring the half-cell shift.
    pub fn neighbors(col: u8, row: u8) -> impl Iterator<Item = (u8, u8)> {
        let (c, r) = (col as i32, row as i32);
        let deltas: [(i32, i32); 6] = if row % 2 == 0 {
            [(1, 0), (-1, 0), (0, -1), (1, -1), (0, 1), (1, 1)]
        } else {
            [(1, 0), (-1, 0), (-1, -1), (0, -1), (-1, 1), (0, 1)]
        };
        deltas
            .into_iter()
            .map(move |(dc, dr)| (c + dc, r + dr))
            .filter(|&(nc, nr)| Self::in_bounds(nc, nr))
            .map(|(nc, nr)| (nc as u8, nr as u8))
    }

    /// Shift every occupant down one row.
    ///
    /// Returns the ids pushed out past the last row; the caller treats
    /// any such bubble as an immediate loss.
    pub fn shift_down(&mut self) -> Vec<BubbleId> {
        let mut overflow = Vec::new();
        for col in self.cells.iter_mut() {
            if let Some(id) = col[GRID_ROWS - 1].take() {
                overflow.push(id);
            }
            for row in (1..GRID_ROWS).rev() {
                col[row] = col[row - 1].take();
            }
        }
        overflow
    }
}

// =============================================================================
// TESTS
// =============================================================================
