//! Core deterministic primitives.
//!
//! All types in this module are designed for perfect cross-platform
//! determinism. Both peers run the simulation independently; the protocol
//! only stays cheap if their random streams and checksums never diverge.

pub mod checksum;
pub mod rng;

// Re-export core types
pub use checksum::{crc16, derive_game_seed, Crc16, GridChecksum};
pub use rng::DeterministicRng;
