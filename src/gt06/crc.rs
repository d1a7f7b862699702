//! # CRC-16/IBM Implementation
//!
//! Reflected CRC-16 checksum used by GT06 frames.
//!
//! **Polynomial**: 0xA001 (0x8005 reflected)
//! **Initial Value**: 0xFFFF
//!
//! With this seed the algorithm is also known as CRC-16/MODBUS. Seeded with
//! 0x0000 it is CRC-16/ARC, which is what most "CRC-16/IBM" reference
//! tables list.

/// Reflected CRC-16/IBM polynomial
const CRC16_POLY: u16 = 0xA001;

/// Initial value used for GT06 frames
pub const CRC16_GT06_INIT: u16 = 0xFFFF;

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
                crc = (crc >> 1) ^ CRC16_POLY;
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

/// Calculate the GT06 frame checksum
///
/// # Arguments
///
/// * `data` - Bytes from the length field through the serial number
///
/// # Examples
///
/// ```
/// use asset_tracker::gt06::crc::crc16_ibm;
///
/// assert_eq!(crc16_ibm(b"123456789"), 0x4B37);
/// ```
pub fn crc16_ibm(data: &[u8]) -> u16 {
    crc16_ibm_with_init(data, CRC16_GT06_INIT)
}

/// Calculate CRC-16/IBM with an explicit seed using the lookup table
pub fn crc16_ibm_with_init(data: &[u8], init: u16) -> u16 {
    let mut crc = init;

    for &byte in data {
        crc = (crc >> 8) ^ CRC16_TABLE[((crc ^ byte as u16) & 0x00FF) as usize];
    }

    crc
}

/// Bitwise CRC-16/IBM (slow, for verifying the table)
#[allow(dead_code)]
fn crc16_ibm_slow(data: &[u8], init: u16) -> u16 {
    let mut crc = init;

    for &byte in data {
        crc ^= byte as u16;

        for _ in 0..8 {
            if (crc & 0x0001) != 0 {
                crc = (crc >> 1) ^ CRC16_POLY;
            } else {
                crc >>= 1;
            }
        }
    }

    crc
}
