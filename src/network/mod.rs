//! Network Layer
//!
//! Peer-to-peer UDP synchronization between two simulations.
//! This layer is **non-deterministic** - all game logic runs through `game/`.

pub mod protocol;
pub mod session;
pub mod transport;

pub use protocol::{
    Datagram, FieldData, MessageKind, PlayerAction, PlayerStatus, Preferences, ProtocolError,
};
pub use session::{drive, SyncConfig, SyncError, SyncEvent, SyncManager, SyncState};
pub use transport::{PeerMode, TransportConfig, TransportError, TransportHandle, UdpTransport};
