//! Game Logic Module
//!
//! The whole bubble-grid simulation. 100% deterministic.
//!
//! ## Module Structure
//!
//! - `bubble`: Bubble lifecycle and arena storage
//! - `grid`: 8x13 hex-offset grid, geometry, adjacency
//! - `compressor`: launch-cycle driven grid compression
//! - `palette`: remaining-color bookkeeping and color draws
//! - `attack`: attack-bar credit and rising volleys
//! - `level`: initial layouts
//! - `state`: whole-game state, snapshots, invariants
//! - `tick`: per-frame simulation step
//! - `events`: game events emitted by the tick

pub mod attack;
pub mod bubble;
pub mod compressor;
pub mod events;
pub mod grid;
pub mod level;
pub mod palette;
pub mod state;
pub mod tick;

// Re-export key types
pub use bubble::{Bubble, BubbleArena, BubbleId, BubbleState};
pub use events::GameEvent;
pub use grid::Grid;
pub use state::{GameConfig, GamePhase, GameState};
pub use tick::{tick, GameInput, TickResult};
