//! CRC32 checksums for command messages
//!
//! Commands carry a CRC32 (IEEE 802.3 polynomial) over their packed body so a
//! corrupted setpoint is rejected on receipt rather than applied to a motor.

use crc32fast::Hasher;

/// Compute CRC32 checksum for the given data
///
/// # Example
///
/// ```
/// use igris_core::msg::crc::compute_crc;
///
/// assert_eq!(compute_crc(b"hello"), 0x3610a686);
/// ```
pub fn compute_crc(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Verify that the CRC32 checksum of `data` matches `expected_crc`
pub fn verify_crc(data: &[u8], expected_crc: u32) -> bool {
    compute_crc(data) == expected_crc
}
