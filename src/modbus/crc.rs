//! # CRC-16/MODBUS Implementation
//!
//! CRC-16 checksum used by Modbus RTU frames.
//!
//! **Polynomial**: 0x8005 (reflected: 0xA001)
//! **Initial Value**: 0xFFFF
//! **Reflected input/output**: yes, no final XOR
//!
//! The checksum is transmitted low byte first.

/// CRC-16/MODBUS polynomial, bit-reversed for the LSB-first algorithm
const CRC16_POLY_REFLECTED: u16 = 0xA001;

/// Initial CRC register value
const CRC16_INIT: u16 = 0xFFFF;

/// Precomputed CRC16 lookup table for fast calculation
const CRC16_TABLE: [u16; 256] = generate_crc16_table();

/// Generate CRC16 lookup table at compile time
const fn generate_crc16_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;

    while i < 256 {
        let mut crc = i as u16;
        let mut j = 0;

        while j < 8 {
            if (crc & 0x0001) != 0 {
                crc = (crc >> 1) ^ CRC16_POLY_REFLECTED;
            } else {
                crc >>= 1;
            }
            j += 1;
        }

        table[i] = crc;
        i += 1;
    }

    table
}

/// Calculate the Modbus CRC-16 of `data` using the lookup table
///
/// # Examples
///
/// ```
/// use flowmeter_rtu::modbus::crc::generate;
///
/// assert_eq!(generate(b"123456789"), 0x4B37);
/// ```
pub fn generate(data: &[u8]) -> u16 {
    let mut crc = CRC16_INIT;

    for &byte in data {
        crc = (crc >> 8) ^ CRC16_TABLE[((crc ^ byte as u16) & 0xFF) as usize];
    }

    crc
}

/// Check a received CRC field against the frame contents
///
/// # Arguments
///
/// * `data` - Frame bytes without the CRC field
/// * `crc_field` - The two CRC bytes as received (low byte first)
pub fn verify(data: &[u8], crc_field: [u8; 2]) -> bool {
    generate(data) == u16::from_le_bytes(crc_field)
}

/// Split a CRC into its wire representation (low byte first)
#[inline]
pub fn to_wire(crc: u16) -> [u8; 2] {
    crc.to_le_bytes()
}

/// Bitwise CRC-16/MODBUS (slow, for verifying the table)
#[cfg(test)]
fn generate_slow(data: &[u8]) -> u16 {
    let mut crc = CRC16_INIT;

    for &byte in data {
        crc ^= byte as u16;

        for _ in 0..8 {
            if (crc & 0x0001) != 0 {
                crc = (crc >> 1) ^ CRC16_POLY_REFLECTED;
            } else {
                crc >>= 1;
            }
        }
    }

    crc
}

#[cfg(test)]
mod tests {
    use super::*;
    use ::crc::{Crc, CRC_16_MODBUS};

    const ORACLE: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

    #[test]
    fn test_crc16_empty_is_init() {
        assert_eq!(generate(&[]), 0xFFFF);
    }

    #[test]
    fn test_crc16_check_value() {
        // Catalogue check value for CRC-16/MODBUS
        assert_eq!(generate(b"123456789"), 0x4B37);
    }

    #[test]
    fn test_crc16_known_frames() {
        // Read holding register 0 from slave 1: 01 03 00 00 00 01 84 0A
        assert_eq!(to_wire(generate(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x01])), [0x84, 0x0A]);

        // Read input register 1 from slave 7
        assert_eq!(to_wire(generate(&[0x07, 0x04, 0x00, 0x01, 0x00, 0x01])), [0x60, 0x6C]);
    }

    #[test]
    fn test_crc16_lookup_table_matches_slow() {
        let test_data = [
            vec![0x01, 0x02, 0x03],
            vec![0xFF, 0xFE, 0xFD],
            vec![0x07, 0x04, 0x02, 0x00, 0x2A],
            vec![0x00; 24],
            vec![0xFF; 10],
        ];

        for data in test_data.iter() {
            assert_eq!(generate(data), generate_slow(data), "CRC mismatch for data: {:?}", data);
        }
    }

    #[test]
    fn test_crc16_matches_reference_crate() {
        let mut data = Vec::new();
        for i in 0..=255u8 {
            data.push(i.wrapping_mul(37).wrapping_add(11));
            assert_eq!(generate(&data), ORACLE.checksum(&data));
        }
    }

    #[test]
    fn test_verify_round_trip() {
        let messages: [&[u8]; 4] = [
            &[],
            &[0x00],
            &[0x07, 0x04, 0x00, 0x01, 0x00, 0x01],
            b"flow meter",
        ];

        for msg in messages {
            assert!(verify(msg, to_wire(generate(msg))));
        }
    }

    #[test]
    fn test_verify_rejects_swapped_bytes() {
        let msg = [0x07, 0x04, 0x00, 0x01, 0x00, 0x01];
        let [lo, hi] = to_wire(generate(&msg));
        assert!(!verify(&msg, [hi, lo]));
    }

    #[test]
    fn test_crc16_changes_with_data() {
        let crc1 = generate(&[0x07, 0x04, 0x00, 0x01]);
        let crc2 = generate(&[0x07, 0x04, 0x00, 0x02]);
        assert_ne!(crc1, crc2, "CRC should change when data changes");
    }
}
