//! Game Events
//!
//! Emitted by the tick so callers (demo loop, sync layer, tests) can see
//! what happened in a frame without poking at internal state. The sync
//! layer ships `ClusterPopped` credit and `VolleyReleased` lanes to the
//! peer; everything else is informational.

use serde::{Deserialize, Serialize};

use super::attack::Volley;

/// Something that happened during one simulation frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum GameEvent {
    /// A bubble left the launcher.
    Fired {
        /// Color of the bubble in flight.
        color: u8,
        /// True when the hurry timer forced the shot.
        forced: bool,
    },
    /// Current and next launcher colors were swapped.
    Swapped,
    /// The moving bubble snapped into a cell.
    Stuck {
        /// Column it landed in.
        col: u8,
        /// Row it landed in.
        row: u8,
    },
    /// A same-color cluster of three or more popped.
    ClusterPopped {
        /// Bubbles removed.
        size: u16,
        /// Credit owed to the opponent (size beyond three).
        attack_credit: u16,
    },
    /// Bubbles cut off from the ceiling dropped.
    FloatersDropped {
        /// Bubbles that fell.
        count: u16,
    },
    /// The compressor advanced a step, lowering the loss line.
    Compressed {
        /// New step count.
        steps: u8,
    },
    /// The compressor wrapped and the grid shifted down a row.
    GridShifted,
    /// Attack bubbles were released toward this field.
    VolleyReleased {
        /// Per-lane colors, -1 for an unused lane.
        lanes: Volley,
    },
    /// The field is clear.
    Won,
    /// A bubble crossed the loss line.
    Lost,
    /// Tracked counts and grid occupancy disagree; the sync layer should
    /// request a field snapshot instead of trusting local state.
    TrackingLost,
}
