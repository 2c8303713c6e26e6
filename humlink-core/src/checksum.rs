//! Controller frame checksum
//!
//! The pad controller firmware protects every frame with CRC-16/CCITT-FALSE:
//! 1. Start from 0xFFFF
//! 2. XOR each byte into the top 8 bits of the running value
//! 3. Shift left 8 times, XORing 0x1021 whenever the top bit falls out
//! 4. No reflection, no final XOR
//!
//! The covered range is everything after the 16-bit header marker up to the
//! checksum field itself.

use tracing::trace;

/// Generator polynomial
pub const POLYNOMIAL: u16 = 0x1021;

/// Initial register value
pub const INITIAL: u16 = 0xFFFF;

/// Calculate the CRC-16 of `data`
///
/// # Algorithm
///
/// ```text
/// crc = 0xFFFF
/// for byte in data:
///     crc ^= byte << 8
///     repeat 8: crc = (crc & 0x8000) ? (crc << 1) ^ 0x1021 : crc << 1
/// ```
///
/// # Examples
///
/// ```
/// use humlink_core::checksum;
///
/// // target mask 0x0001 + GET_SERIAL_NUMBER
/// assert_eq!(checksum::calculate(&[0x01, 0x00, 0x24]), 0x9F4A);
/// ```
pub fn calculate(data: &[u8]) -> u16 {
    let mut crc = INITIAL;

    for &byte in data {
        crc ^= u16::from(byte) << 8;

        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ POLYNOMIAL
            } else {
                crc << 1
            };
        }
    }

    trace!(
        len = data.len(),
        checksum = format!("0x{:04X}", crc),
        "Calculated checksum"
    );

    crc
}

/// Verify checksum
pub fn verify(data: &[u8], expected: u16) -> bool {
    calculate(data) == expected
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_checksum_check_value() {
        // Catalogued check value for CRC-16/CCITT-FALSE
        assert_eq!(calculate(b"123456789"), 0x29B1);
    }

    #[test]
    fn test_checksum_serial_number_command() {
        // Body of FE ED 01 00 24 4A 9F 04 04 (checksum travels little-endian)
        assert_eq!(calculate(&[0x01, 0x00, 0x24]), 0x9F4A);
    }

    #[test]
    fn test_checksum_empty() {
        assert_eq!(calculate(&[]), INITIAL);
    }

    #[test]
    fn test_checksum_single_byte() {
        assert_eq!(calculate(&[0x24]), 0x8516);
        assert_eq!(calculate(&[0x00, 0x24]), 0x79E9);
    }

    #[test]
    fn test_checksum_verify() {
        let data = [0xAB, 0xCD, 0xEF];
        let crc = calculate(&data);

        assert!(verify(&data, crc));
        assert!(!verify(&data, crc.wrapping_add(1)));
    }

    #[test]
    fn test_checksum_order_sensitive() {
        assert_ne!(calculate(&[0x01, 0x02]), calculate(&[0x02, 0x01]));
    }

    proptest! {
        #[test]
        fn prop_checksum_deterministic(data in proptest::collection::vec(any::<u8>(), 0..512)) {
            prop_assert_eq!(calculate(&data), calculate(&data));
        }

        #[test]
        fn prop_single_bit_flip_changes_checksum(
            data in proptest::collection::vec(any::<u8>(), 1..128),
            index in any::<prop::sample::Index>(),
            bit in 0u8..8,
        ) {
            let mut flipped = data.clone();
            let i = index.index(flipped.len());
            flipped[i] ^= 1 << bit;

            prop_assert_ne!(calculate(&data), calculate(&flipped));
        }
    }
}
