//! Wire Protocol Codecs
//!
//! Four fixed-length datagram kinds synchronize a duel. Every datagram
//! starts with a two-byte header: the session (game) identifier and the
//! message kind. Multi-byte integers are big-endian; the aim travels as
//! an 8-byte IEEE-754 double. A datagram whose length does not exactly
//! match its kind, or whose kind is unknown, is discarded by the caller
//! (logged at debug level, never treated as fatal).

use thiserror::Error;

use crate::game::attack::{Volley, ATTACK_LANES};
use crate::game::grid::GRID_CELLS;

/// Header length: game id + kind.
pub const HEADER_BYTES: usize = 2;
/// Status payload length.
pub const STATUS_BYTES: usize = 14;
/// Preferences payload length (22 settings bytes + sender id).
pub const PREFS_BYTES: usize = 23;
/// Action payload length.
pub const ACTION_BYTES: usize = 37;
/// Field snapshot payload length.
pub const FIELD_BYTES: usize = 8 + GRID_CELLS;

/// Game id carried while no session identifier is held yet.
pub const GAME_ID_NONE: u8 = 255;
/// Largest claimable session identifier.
pub const MAX_GAME_ID: u8 = 99;

/// Message kinds, as they appear on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageKind {
    /// Periodic peer status.
    Status = 1,
    /// Game preferences from player 1.
    Prefs = 2,
    /// One player action.
    Action = 3,
    /// Full field snapshot.
    Field = 4,
}

impl MessageKind {
    /// Parse the wire tag.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Self::Status),
            2 => Some(Self::Prefs),
            3 => Some(Self::Action),
            4 => Some(Self::Field),
            _ => None,
        }
    }

    /// Expected payload length for this kind.
    pub fn payload_len(self) -> usize {
        match self {
            Self::Status => STATUS_BYTES,
            Self::Prefs => PREFS_BYTES,
            Self::Action => ACTION_BYTES,
            Self::Field => FIELD_BYTES,
        }
    }
}

/// Why a datagram was rejected.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// Shorter than the header.
    #[error("datagram of {0} bytes is shorter than the header")]
    Truncated(usize),
    /// Unknown kind tag.
    #[error("unknown message kind {0}")]
    UnknownKind(u8),
    /// Length does not match the kind.
    #[error("{kind:?} datagram of {got} bytes, expected {expected}")]
    WrongLength {
        /// Claimed kind.
        kind: MessageKind,
        /// Received total length.
        got: usize,
        /// Expected total length.
        expected: usize,
    },
}

/// Periodic status: sequence counts, request flags and grid digests.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PlayerStatus {
    /// Sender's player number (1 or 2).
    pub player_id: u8,
    /// Wire protocol version.
    pub protocol_version: u8,
    /// Highest action sequence the sender has produced.
    pub local_seq: u16,
    /// Action sequence the sender expects from its peer next.
    pub remote_seq: u16,
    /// Sender is ready to play.
    pub ready: bool,
    /// Sender's round is over (won or lost).
    pub game_over: bool,
    /// Sender wants a field snapshot.
    pub field_request: bool,
    /// Sender wants the preferences.
    pub prefs_request: bool,
    /// Digest of the sender's own grid.
    pub local_checksum: u16,
    /// Digest of the peer's grid as the sender last computed it.
    pub remote_checksum: u16,
}

impl PlayerStatus {
    fn write(&self, out: &mut Vec<u8>) {
        out.push(self.player_id);
        out.push(self.protocol_version);
        out.extend_from_slice(&self.local_seq.to_be_bytes());
        out.extend_from_slice(&self.remote_seq.to_be_bytes());
        out.push(self.ready as u8);
        out.push(self.game_over as u8);
        out.push(self.field_request as u8);
        out.push(self.prefs_request as u8);
        out.extend_from_slice(&self.local_checksum.to_be_bytes());
        out.extend_from_slice(&self.remote_checksum.to_be_bytes());
    }

    fn read(p: &[u8]) -> Self {
        Self {
            player_id: p[0],
            protocol_version: p[1],
            local_seq: u16::from_be_bytes([p[2], p[3]]),
            remote_seq: u16::from_be_bytes([p[4], p[5]]),
            ready: p[6] != 0,
            game_over: p[7] != 0,
            field_request: p[8] != 0,
            prefs_request: p[9] != 0,
            local_checksum: u16::from_be_bytes([p[10], p[11]]),
            remote_checksum: u16::from_be_bytes([p[12], p[13]]),
        }
    }
}

/// Game preferences, sent by player 1 on request.
///
/// Only `collision` and `compressor_enabled` feed the simulation; the
/// rest ride along verbatim for the surrounding application.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Preferences {
    /// Sender's player number.
    pub sender_id: u8,
    /// Collision sensitivity.
    pub collision: i32,
    /// Colorblind sprite set.
    pub colorblind: bool,
    /// Compressor enabled.
    pub compressor_enabled: bool,
    /// Difficulty level.
    pub difficulty: i32,
    /// Hurry prompts suppressed.
    pub dont_rush: bool,
    /// Fullscreen display.
    pub fullscreen: bool,
    /// Game mode.
    pub game_mode: i32,
    /// Music on.
    pub music: bool,
    /// Sound effects on.
    pub sound: bool,
    /// Targeting helper mode.
    pub target_mode: i32,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            sender_id: 1,
            collision: 9,
            colorblind: false,
            compressor_enabled: true,
            difficulty: 1,
            dont_rush: false,
            fullscreen: true,
            game_mode: 0,
            music: true,
            sound: true,
            target_mode: 0,
        }
    }
}

impl Preferences {
    fn write(&self, out: &mut Vec<u8>) {
        out.push(self.sender_id);
        out.extend_from_slice(&self.collision.to_be_bytes());
        out.push(self.colorblind as u8);
        out.push(self.compressor_enabled as u8);
        out.extend_from_slice(&self.difficulty.to_be_bytes());
        out.push(self.dont_rush as u8);
        out.push(self.fullscreen as u8);
        out.extend_from_slice(&self.game_mode.to_be_bytes());
        out.push(self.music as u8);
        out.push(self.sound as u8);
        out.extend_from_slice(&self.target_mode.to_be_bytes());
    }

    fn read(p: &[u8]) -> Self {
        Self {
            sender_id: p[0],
            collision: i32::from_be_bytes([p[1], p[2], p[3], p[4]]),
            colorblind: p[5] != 0,
            compressor_enabled: p[6] != 0,
            difficulty: i32::from_be_bytes([p[7], p[8], p[9], p[10]]),
            dont_rush: p[11] != 0,
            fullscreen: p[12] != 0,
            game_mode: i32::from_be_bytes([p[13], p[14], p[15], p[16]]),
            music: p[17] != 0,
            sound: p[18] != 0,
            target_mode: i32::from_be_bytes([p[19], p[20], p[21], p[22]]),
        }
    }
}

/// One discrete player action, retransmitted until acknowledged.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PlayerAction {
    /// Sender's player number.
    pub player_id: u8,
    /// This action's sequence number.
    pub local_seq: u16,
    /// Action sequence the sender expects from its peer next.
    pub remote_seq: u16,
    /// The sender's compressor advanced with this action.
    pub compress: bool,
    /// A bubble was launched.
    pub launch: bool,
    /// Launcher colors were swapped.
    pub swap: bool,
    /// Raw key code for the surrounding application.
    pub key_code: u8,
    /// Color launched.
    pub launch_color: i8,
    /// Color promoted to current.
    pub next_color: i8,
    /// Fresh color on deck.
    pub new_next_color: i8,
    /// Sender's attack-bar count after this action.
    pub attack_pending: u16,
    /// Released volley lanes, -1 per empty lane.
    pub attack_lanes: Volley,
    /// Absolute aim position.
    pub aim: f64,
}

impl Default for PlayerAction {
    fn default() -> Self {
        Self {
            player_id: 0,
            local_seq: 0,
            remote_seq: 0,
            compress: false,
            launch: false,
            swap: false,
            key_code: 0,
            launch_color: -1,
            next_color: -1,
            new_next_color: -1,
            attack_pending: 0,
            attack_lanes: [-1; ATTACK_LANES],
            aim: 0.0,
        }
    }
}

impl PlayerAction {
    fn write(&self, out: &mut Vec<u8>) {
        out.push(self.player_id);
        out.extend_from_slice(&self.local_seq.to_be_bytes());
        out.extend_from_slice(&self.remote_seq.to_be_bytes());
        out.push(self.compress as u8);
        out.push(self.launch as u8);
        out.push(self.swap as u8);
        out.push(self.key_code);
        out.push(self.launch_color as u8);
        out.push(self.next_color as u8);
        out.push(self.new_next_color as u8);
        out.extend_from_slice(&self.attack_pending.to_be_bytes());
        for &lane in &self.attack_lanes {
            out.push(lane as u8);
        }
        out.extend_from_slice(&self.aim.to_be_bytes());
    }

    fn read(p: &[u8]) -> Self {
        let mut attack_lanes = [-1i8; ATTACK_LANES];
        for (i, lane) in attack_lanes.iter_mut().enumerate() {
            *lane = p[14 + i] as i8;
        }
        Self {
            player_id: p[0],
            local_seq: u16::from_be_bytes([p[1], p[2]]),
            remote_seq: u16::from_be_bytes([p[3], p[4]]),
            compress: p[5] != 0,
            launch: p[6] != 0,
            swap: p[7] != 0,
            key_code: p[8],
            launch_color: p[9] as i8,
            next_color: p[10] as i8,
            new_next_color: p[11] as i8,
            attack_pending: u16::from_be_bytes([p[12], p[13]]),
            attack_lanes,
            aim: f64::from_be_bytes([
                p[29], p[30], p[31], p[32], p[33], p[34], p[35], p[36],
            ]),
        }
    }
}

/// Full field snapshot for resynchronization.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FieldData {
    /// Sender's player number.
    pub player_id: u8,
    /// Sender's action sequence when the snapshot was taken.
    pub local_seq: u16,
    /// Compressor step count.
    pub compressor_steps: u8,
    /// Launcher color.
    pub launch_color: i8,
    /// Color on deck.
    pub next_color: i8,
    /// Attack-bar count.
    pub attack_pending: u16,
    /// Grid colors, column-major, -1 per empty cell.
    pub grid: [i8; GRID_CELLS],
}

impl Default for FieldData {
    fn default() -> Self {
        Self {
            player_id: 0,
            local_seq: 0,
            compressor_steps: 0,
            launch_color: -1,
            next_color: -1,
            attack_pending: 0,
            grid: [-1; GRID_CELLS],
        }
    }
}

impl FieldData {
    fn write(&self, out: &mut Vec<u8>) {
        out.push(self.player_id);
        out.extend_from_slice(&self.local_seq.to_be_bytes());
        out.push(self.compressor_steps);
        out.push(self.launch_color as u8);
        out.push(self.next_color as u8);
        out.extend_from_slice(&self.attack_pending.to_be_bytes());
        for &cell in &self.grid {
            out.push(cell as u8);
        }
    }

    fn read(p: &[u8]) -> Self {
        let mut grid = [-1i8; GRID_CELLS];
        for (i, cell) in grid.iter_mut().enumerate() {
            *cell = p[8 + i] as i8;
        }
        Self {
            player_id: p[0],
            local_seq: u16::from_be_bytes([p[1], p[2]]),
            compressor_steps: p[3],
            launch_color: p[4] as i8,
            next_color: p[5] as i8,
            attack_pending: u16::from_be_bytes([p[6], p[7]]),
            grid,
        }
    }
}

/// Any decoded datagram.
#[derive(Clone, Debug, PartialEq)]
pub enum Datagram {
    /// Periodic status.
    Status(PlayerStatus),
    /// Preferences.
    Prefs(Preferences),
    /// Player action.
    Action(PlayerAction),
    /// Field snapshot.
    Field(FieldData),
}

impl Datagram {
    /// The wire kind of this datagram.
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Status(_) => MessageKind::Status,
            Self::Prefs(_) => MessageKind::Prefs,
            Self::Action(_) => MessageKind::Action,
            Self::Field(_) => MessageKind::Field,
        }
    }

    /// Encode with the given session identifier in the header.
    pub fn encode(&self, game_id: u8) -> Vec<u8> {
        let kind = self.kind();
        let mut out = Vec::with_capacity(HEADER_BYTES + kind.payload_len());
        out.push(game_id);
        out.push(kind as u8);
        match self {
            Self::Status(m) => m.write(&mut out),
            Self::Prefs(m) => m.write(&mut out),
            Self::Action(m) => m.write(&mut out),
            Self::Field(m) => m.write(&mut out),
        }
        debug_assert_eq!(out.len(), HEADER_BYTES + kind.payload_len());
        out
    }

    /// Decode a raw datagram into (session id, message).
    ///
    /// Length is validated strictly: anything that is not exactly
    /// header + payload for its kind is an error the caller discards.
    pub fn decode(bytes: &[u8]) -> Result<(u8, Self), ProtocolError> {
        if bytes.len() < HEADER_BYTES {
            return Err(ProtocolError::Truncated(bytes.len()));
        }
        let game_id = bytes[0];
        let kind = MessageKind::from_byte(bytes[1]).ok_or(ProtocolError::UnknownKind(bytes[1]))?;
        let expected = HEADER_BYTES + kind.payload_len();
        if bytes.len() != expected {
            return Err(ProtocolError::WrongLength {
                kind,
                got: bytes.len(),
                expected,
            });
        }
        let payload = &bytes[HEADER_BYTES..];
        let message = match kind {
            MessageKind::Status => Self::Status(PlayerStatus::read(payload)),
            MessageKind::Prefs => Self::Prefs(Preferences::read(payload)),
            MessageKind::Action => Self::Action(PlayerAction::read(payload)),
            MessageKind::Field => Self::Field(FieldData::read(payload)),
        };
        Ok((game_id, message))
    }
}

// =============================================================================
// TESTS
// =============================================================================
