//! Grid Checksums and Seed Derivation
//!
//! The status protocol carries 16-bit digests of each peer's grid so the
//! sides can detect divergence cheaply. CRC-16/CCITT-FALSE is used: both
//! peers run this exact code, so any stable 16-bit digest works, and a
//! CRC fits the two bytes the status payload reserves for it.
//!
//! Seed derivation hashes the duel parameters with SHA-256 so both peers
//! arrive at the same PRNG seed without ever exchanging it.

use sha2::{Digest, Sha256};

/// 16-bit grid digest carried in status messages. Zero means "not yet
/// computed" on the wire, so callers must avoid emitting a raw zero.
pub type GridChecksum = u16;

/// CRC-16/CCITT-FALSE polynomial.
const CRC16_POLY: u16 = 0x1021;

/// CRC-16/CCITT-FALSE initial value.
const CRC16_INIT: u16 = 0xFFFF;

/// Incremental CRC-16/CCITT-FALSE.
///
/// Update order is significant; callers feed grid bytes in wire order so
/// both peers digest identical streams.
#[derive(Clone, Debug)]
pub struct Crc16 {
    value: u16,
}

impl Default for Crc16 {
    fn default() -> Self {
        Self::new()
    }
}

impl Crc16 {
    /// Start a fresh digest.
    pub fn new() -> Self {
        Self { value: CRC16_INIT }
    }

    /// Feed a single byte.
    #[inline]
    pub fn update_u8(&mut self, byte: u8) {
        self.value ^= (byte as u16) << 8;
        for _ in 0..8 {
            if self.value & 0x8000 != 0 {
                self.value = (self.value << 1) ^ CRC16_POLY;
            } else {
                self.value <<= 1;
            }
        }
    }

    /// Feed a slice of bytes.
    #[inline]
    pub fn update_bytes(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.update_u8(b);
        }
    }

    /// Feed a u16 (big-endian, matching the wire byte order).
    #[inline]
    pub fn update_u16(&mut self, value: u16) {
        self.update_bytes(&value.to_be_bytes());
    }

    /// Finish and return the digest.
    pub fn finalize(self) -> GridChecksum {
        self.value
    }
}

/// One-shot CRC-16/CCITT-FALSE over a byte slice.
pub fn crc16(bytes: &[u8]) -> GridChecksum {
    let mut crc = Crc16::new();
    crc.update_bytes(bytes);
    crc.finalize()
}

/// Derive the shared PRNG seed for a duel.
///
/// Hashes a domain separator, the claimed session identifier and both
/// player numbers. Both peers know all three once the session is
/// established, so they derive the same seed independently.
pub fn derive_game_seed(game_id: u8, player_ids: &[u8]) -> u64 {
    let mut hasher = Sha256::new();

    // Domain separator
    hasher.update(b"BUBBLE_DUEL_SEED_V1");
    hasher.update([game_id]);

    // Player numbers in ascending order so both sides agree
    let mut sorted: Vec<u8> = player_ids.to_vec();
    sorted.sort_unstable();
    hasher.update(&sorted);

    let hash = hasher.finalize();

    // First 8 bytes as the seed
    u64::from_le_bytes(hash[0..8].try_into().unwrap_or([0; 8]))
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc16_check_value() {
        // Standard CRC-16/CCITT-FALSE check value. Must never change or
        // peers built from different releases will resync forever.
        assert_eq!(crc16(b"123456789"), 0x29B1);
    }

    #[test]
    fn test_crc16_empty() {
        assert_eq!(crc16(&[]), CRC16_INIT);
    }

    #[test]
    fn test_crc16_incremental_matches_oneshot() {
        let data = [0x01u8, 0xFF, 0x42, 0x00, 0x7F];

        let mut crc = Crc16::new();
        for &b in &data {
            crc.update_u8(b);
        }

        assert_eq!(crc.finalize(), crc16(&data));
    }

    #[test]
    fn test_crc16_order_matters() {
        assert_ne!(crc16(&[1, 2, 3]), crc16(&[3, 2, 1]));
    }

    #[test]
    fn test_derive_game_seed_stable() {
        let seed1 = derive_game_seed(7, &[1, 2]);
        let seed2 = derive_game_seed(7, &[2, 1]);

        // Player order must not matter
        assert_eq!(seed1, seed2);

        // Different session, different seed
        let seed3 = derive_game_seed(8, &[1, 2]);
        assert_ne!(seed1, seed3);
    }
}
