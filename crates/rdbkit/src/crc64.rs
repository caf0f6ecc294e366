//! CRC-64 with the polynomial used by the snapshot format.
//!
//! The polynomial differs from the ECMA standard one, the table is
//! bit-reversed, and there is no pre- or post-inversion. A zero CRC in a
//! snapshot means the producer disabled checksumming.

use std::sync::OnceLock;

use crate::constants::SUPPORTED_VERSION;
use crate::error::{Result, SnapshotError};

/// Polynomial used in the table construction. It must match the one the
/// data store itself uses, or checksums of its dumps will never verify.
const POLY: u64 = 0xAD93D23594C935A9;

static TABLE: OnceLock<[u64; 256]> = OnceLock::new();

fn table() -> &'static [u64; 256] {
    TABLE.get_or_init(|| {
        let mut table = [0u64; 256];
        for (i, slot) in table.iter_mut().enumerate() {
            let mut crc = 0u64;
            let mut j = 1u8;
            loop {
                let mut bit = crc & 0x8000_0000_0000_0000;
                if i as u8 & j != 0 {
                    bit = if bit == 0 { 1 } else { 0 };
                }
                crc <<= 1;
                if bit != 0 {
                    crc ^= POLY;
                }
                j = j.wrapping_shl(1);
                if j == 0 {
                    break;
                }
            }
            *slot = crc.reverse_bits();
        }
        table
    })
}

/// Returns the CRC-64 of `payload`, continuing from `crc`.
pub fn crc64(crc: u64, payload: &[u8]) -> u64 {
    let table = table();
    let mut crc = crc;
    for &byte in payload {
        crc = table[((crc ^ byte as u64) & 0xFF) as usize] ^ (crc >> 8);
    }
    crc
}

/// Size of the checksum block terminating a value dump: 2 bytes of RDB
/// version plus 8 bytes of CRC-64.
pub const VALUE_CHECKSUM_SIZE: usize = 10;

/// Validates the checksum block at the end of a value dump: the encoded RDB
/// version must not exceed the supported ceiling, and the stored CRC must
/// match the CRC-64 of everything before it.
pub fn verify_value_checksum(payload: &[u8]) -> Result<()> {
    let n = payload.len();
    if n < VALUE_CHECKSUM_SIZE {
        return Err(SnapshotError::UnexpectedEof);
    }

    let version_at = n - VALUE_CHECKSUM_SIZE;
    let version = u16::from_le_bytes([payload[version_at], payload[version_at + 1]]);
    if version > SUPPORTED_VERSION {
        return Err(SnapshotError::UnsupportedVersion(version));
    }

    let tail = &payload[n - 8..];
    let stored = u64::from_le_bytes([
        tail[0], tail[1], tail[2], tail[3], tail[4], tail[5], tail[6], tail[7],
    ]);
    let computed = crc64(0, &payload[..n - 8]);
    if stored != computed {
        return Err(SnapshotError::BadCrc { stored, computed });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_payload() {
        assert_eq!(crc64(0, &[]), 0);
    }

    #[test]
    fn known_vector() {
        assert_eq!(crc64(0, &[1, 2, 3, 4, 44, 42, 252]), 816497613141667909);
    }

    #[test]
    fn resumable() {
        let payload = [1, 2, 3, 4, 44, 42, 252];
        let partial = crc64(0, &payload[..3]);
        assert_eq!(crc64(partial, &payload[3..]), crc64(0, &payload));
    }

    #[test]
    fn checksum_block_vector() {
        // Version 11 header of an empty value dump and its stored CRC.
        let crc = crc64(0, &[11, 0]);
        assert_eq!(
            crc.to_le_bytes(),
            [52, 68, 225, 51, 242, 224, 75, 83],
        );
    }

    #[test]
    fn verify_checksum_accepts_valid_dumps() {
        verify_value_checksum(&[11, 0, 52, 68, 225, 51, 242, 224, 75, 83]).unwrap();
        verify_value_checksum(&[
            0, 12, 117, 112, 115, 116, 97, 115, 104, 114, 111, 99, 107, 115, 10, 0, 219, 124,
            214, 167, 201, 155, 113, 148,
        ])
        .unwrap();
    }

    #[test]
    fn verify_checksum_rejects_short_payload() {
        assert!(matches!(
            verify_value_checksum(&[1, 2, 3]),
            Err(SnapshotError::UnexpectedEof)
        ));
    }

    #[test]
    fn verify_checksum_rejects_future_version() {
        assert!(matches!(
            verify_value_checksum(&[42, 0, 255, 50, 213, 243, 8, 202, 213, 26]),
            Err(SnapshotError::UnsupportedVersion(42))
        ));
    }

    #[test]
    fn verify_checksum_rejects_corrupt_payload() {
        // The first byte should be 0.
        let err = verify_value_checksum(&[
            1, 8, 33, 85, 80, 115, 116, 97, 115, 104, 10, 0, 118, 38, 238, 102, 71, 149, 199, 18,
        ])
        .unwrap_err();
        assert!(matches!(err, SnapshotError::BadCrc { .. }));
    }
}
