//! Initial Layouts
//!
//! A layout is the 8x13 matrix of starting colors, row-major with -1 for
//! empty cells. Odd rows are half-shifted, so their column 0 is outside
//! the wall and must stay empty. Reading layouts from level files is out
//! of scope; a bundled opening layout covers demos and tests.

use thiserror::Error;

use super::bubble::NUM_COLORS;
use super::grid::{GRID_COLS, GRID_ROWS};

/// Starting colors, row-major. -1 = empty.
pub type Layout = [[i8; GRID_COLS]; GRID_ROWS];

/// Why a layout was rejected.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LevelError {
    /// A cell holds a value outside -1..NUM_COLORS.
    #[error("invalid color {value} at column {col}, row {row}")]
    BadColor {
        /// Column of the offending cell.
        col: usize,
        /// Row of the offending cell.
        row: usize,
        /// The rejected value.
        value: i8,
    },
    /// Odd rows have no usable column 0.
    #[error("odd row {row} uses column 0, which sits outside the wall")]
    OddRowLeftCell {
        /// The offending row.
        row: usize,
    },
    /// The last row is the loss line at game start and must be empty.
    #[error("row {row} must start empty")]
    RowNotEmpty {
        /// The offending row.
        row: usize,
    },
}

/// Check a layout before building a game from it.
pub fn validate(layout: &Layout) -> Result<(), LevelError> {
    for (row, cols) in layout.iter().enumerate() {
        for (col, &value) in cols.iter().enumerate() {
            if !(-1..NUM_COLORS as i8).contains(&value) {
                return Err(LevelError::BadColor { col, row, value });
            }
            if value >= 0 {
                if row % 2 == 1 && col == 0 {
                    return Err(LevelError::OddRowLeftCell { row });
                }
                if row == GRID_ROWS - 1 {
                    return Err(LevelError::RowNotEmpty { row });
                }
            }
        }
    }
    Ok(())
}

/// Bundled opening layout: four filled rows in mirrored color pairs.
pub const DEFAULT_LAYOUT: Layout = [
    [0, 0, 1, 1, 2, 2, 3, 3],
    [-1, 4, 4, 5, 5, 6, 6, 7],
    [7, 7, 6, 6, 5, 5, 4, 4],
    [-1, 3, 3, 2, 2, 1, 1, 0],
    [-1, -1, -1, -1, -1, -1, -1, -1],
    [-1, -1, -1, -1, -1, -1, -1, -1],
    [-1, -1, -1, -1, -1, -1, -1, -1],
    [-1, -1, -1, -1, -1, -1, -1, -1],
    [-1, -1, -1, -1, -1, -1, -1, -1],
    [-1, -1, -1, -1, -1, -1, -1, -1],
    [-1, -1, -1, -1, -1, -1, -1, -1],
    [-1, -1, -1, -1, -1, -1, -1, -1],
    [-1, -1, -1, -1, -1, -1, -1, -1],
];

// =============================================================================
// TESTS
// =============================================================================
