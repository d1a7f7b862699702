//! # GT06 Protocol Module
//!
//! Implementation of the GT06 binary tracker protocol.
//!
//! This module handles:
//! - LOGIN, LOCATION and WIFI_LOCATION frame encoding
//! - Frame validation and payload decoding
//! - CRC-16/IBM checksum calculation
//! - Per-frame serial numbers

pub mod protocol;
pub mod encoder;
pub mod decoder;
pub mod crc;
