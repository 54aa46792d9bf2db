//! Block checksum used by the CCLoader bridge.
//!
//! Every 512-byte flash block travels with a 16-bit additive checksum: the
//! plain sum of the payload bytes, truncated to 16 bits. It is not a CRC.

/// Sum `data` byte-wise, wrapping at 16 bits.
pub fn additive16(data: &[u8]) -> u16 {
    data.iter()
        .fold(0u16, |sum, &b| sum.wrapping_add(u16::from(b)))
}
