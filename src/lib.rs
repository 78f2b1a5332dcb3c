//! # Bubble Duel
//!
//! Deterministic two-player bubble-shooter core with a peer-to-peer UDP
//! synchronization protocol.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       BUBBLE DUEL                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Deterministic primitives                  │
//! │  ├── rng.rs      - Deterministic Xorshift128+ PRNG           │
//! │  └── checksum.rs - CRC-16 grid checksum, seed derivation     │
//! │                                                              │
//! │  game/           - Grid simulation (deterministic)           │
//! │  ├── bubble.rs   - Bubble lifecycle and arena storage        │
//! │  ├── grid.rs     - 8x13 hex-offset grid and geometry         │
//! │  ├── compressor.rs grid compression per launch cycle         │
//! │  ├── palette.rs  - Remaining-color bookkeeping               │
//! │  ├── attack.rs   - Attack bar and rising volleys             │
//! │  ├── level.rs    - Initial layouts                           │
//! │  ├── state.rs    - Game state, snapshots, invariants         │
//! │  └── tick.rs     - Per-frame simulation step                 │
//! │                                                              │
//! │  network/        - Networking (non-deterministic)            │
//! │  ├── protocol.rs - Fixed-length datagram codecs              │
//! │  ├── transport.rs- UDP loop (unicast / multicast)            │
//! │  └── session.rs  - Peer synchronization state machine        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Determinism Guarantee
//!
//! The `core/` and `game/` modules are **100% deterministic**:
//! - All randomness from a seeded Xorshift128+ stream
//! - No system time dependencies inside the simulation
//! - No hash-map iteration; storage is arrays and arenas
//!
//! Two engines created from the same seed and fed the same action
//! sequence hold byte-identical grids, so their 16-bit checksums agree
//! on every frame. The network layer only carries inputs; the field
//! snapshot exists to recover from the rare divergence, not to stream
//! state.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod network;

// Re-export commonly used types
pub use crate::core::checksum::GridChecksum;
pub use crate::core::rng::DeterministicRng;
pub use game::state::{GameConfig, GamePhase, GameState};
pub use game::tick::{tick, GameInput, TickResult};
pub use network::protocol::{FieldData, PlayerAction, PlayerStatus, Preferences};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Simulation frame rate (Hz)
pub const FRAME_RATE: u32 = 25;

/// Wire protocol version carried in every status message
pub const PROTOCOL_VERSION: u8 = 1;
