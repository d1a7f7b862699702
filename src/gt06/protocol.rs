//! # GT06 Protocol Constants and Types
//!
//! Core protocol definitions for the GT06 binary uplink.

use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc};

use crate::error::{FrameError, Result, TrackerError};
use crate::location::WifiObservation;

/// Frame start marker
pub const GT06_START: [u8; 2] = [0x78, 0x78];

/// Frame stop marker
pub const GT06_STOP: [u8; 2] = [0x0D, 0x0A];

/// Login message type
pub const GT06_MSG_LOGIN: u8 = 0x01;

/// Location message type
pub const GT06_MSG_LOCATION: u8 = 0x12;

/// WiFi access-point location message type
pub const GT06_MSG_WIFI_LOCATION: u8 = 0x69;

/// Bytes counted by LEN besides the payload: type(1) + serial(2) + crc(2)
pub const GT06_LEN_OVERHEAD: usize = 5;

/// Bytes outside LEN: start(2) + len(1) + stop(2)
pub const GT06_FRAMING_OVERHEAD: usize = 5;

/// Smallest possible frame (empty payload)
pub const GT06_MIN_FRAME_SIZE: usize = GT06_FRAMING_OVERHEAD + GT06_LEN_OVERHEAD;

/// Maximum payload size (LEN is one byte)
pub const GT06_MAX_PAYLOAD_SIZE: usize = u8::MAX as usize - GT06_LEN_OVERHEAD;

/// IMEI payload size for LOGIN (16 hex digits packed into 8 bytes)
pub const GT06_IMEI_SIZE: usize = 8;

/// Date/time block size
pub const GT06_DATETIME_SIZE: usize = 6;

/// LOCATION payload size
pub const GT06_LOCATION_PAYLOAD_SIZE: usize = 18;

/// Per access point in WIFI_LOCATION: MAC(6) + signal(1)
pub const GT06_WIFI_ENTRY_SIZE: usize = 7;

/// Coordinate scale: degrees × 30000 (minutes × 500)
pub const GT06_COORD_SCALE: f64 = 30000.0;

/// Course occupies the low 10 bits of the course/status word
pub const GT06_COURSE_MASK: u16 = 0x03FF;

/// Southern latitude flag in the course/status word
pub const GT06_SOUTH_BIT: u16 = 1 << 10;

/// Western longitude flag in the course/status word
pub const GT06_WEST_BIT: u16 = 1 << 11;

/// Position-valid flag in the course/status word
pub const GT06_VALID_BIT: u16 = 1 << 12;

/// Decoded GT06 frame structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gt06Frame {
    /// Message type
    pub message_type: u8,

    /// Payload data
    pub payload: Vec<u8>,

    /// Sequence number
    pub serial: u16,
}

impl Gt06Frame {
    /// Create a new GT06 frame
    ///
    /// # Errors
    ///
    /// Returns error if payload exceeds GT06_MAX_PAYLOAD_SIZE
    pub fn new(message_type: u8, payload: Vec<u8>, serial: u16) -> Result<Self> {
        if payload.len() > GT06_MAX_PAYLOAD_SIZE {
            return Err(TrackerError::Protocol(format!(
                "Payload size {} exceeds maximum {}",
                payload.len(),
                GT06_MAX_PAYLOAD_SIZE
            )));
        }

        Ok(Self {
            message_type,
            payload,
            serial,
        })
    }

    /// Value of the LEN field (type + payload + serial + crc)
    ///
    /// Cannot overflow since payload is validated to be ≤ 250 bytes
    pub fn length(&self) -> u8 {
        (self.payload.len() + GT06_LEN_OVERHEAD) as u8
    }
}

/// Per-frame sequence counter.
///
/// Starts at 1 and wraps modulo 65536; 0 is a legal value after the wrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerialNumber(u16);

impl Default for SerialNumber {
    fn default() -> Self {
        Self(1)
    }
}

impl SerialNumber {
    /// Serial to stamp on the next frame
    pub fn current(&self) -> u16 {
        self.0
    }

    /// Advance after a frame has been written
    pub fn advance(&mut self) {
        self.0 = self.0.wrapping_add(1);
    }
}

/// Decoded LOCATION payload
#[derive(Debug, Clone, PartialEq)]
pub struct LocationPayload {
    pub timestamp: i64,
    pub satellites: u8,
    pub valid: bool,
    /// Signed degrees, quantized to 1/30000°
    pub latitude: f64,
    pub longitude: f64,
    /// km/h
    pub speed: u8,
    /// Degrees
    pub course: u16,
}

/// Decoded WIFI_LOCATION payload
#[derive(Debug, Clone, PartialEq)]
pub struct WifiLocationPayload {
    pub access_points: Vec<WifiObservation>,
    pub timestamp: i64,
}

/// Pack an IMEI into the 8-byte LOGIN payload
///
/// Keeps the last 16 digits and left-pads shorter values with `0`.
///
/// # Errors
///
/// Returns error if the IMEI is empty or contains non-hex characters
pub fn imei_to_bytes(imei: &str) -> Result<[u8; GT06_IMEI_SIZE]> {
    let imei = imei.trim();
    if imei.is_empty() || !imei.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(TrackerError::Protocol(format!("Invalid IMEI: {:?}", imei)));
    }

    let digits = if imei.len() >= 16 {
        imei[imei.len() - 16..].to_string()
    } else {
        format!("{:0>16}", imei)
    };

    let mut out = [0u8; GT06_IMEI_SIZE];
    for (i, byte) in out.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&digits[i * 2..i * 2 + 2], 16)
            .map_err(|e| TrackerError::Protocol(format!("Invalid IMEI digit: {}", e)))?;
    }

    Ok(out)
}

/// Encode epoch seconds as the 6-byte UTC date/time block
///
/// Years outside 2000..=2255 are clamped to the representable range.
pub fn encode_datetime(timestamp: i64) -> [u8; GT06_DATETIME_SIZE] {
    let dt = DateTime::<Utc>::from_timestamp(timestamp, 0).unwrap_or_default();
    let year = (dt.year() - 2000).clamp(0, u8::MAX as i32) as u8;

    [
        year,
        dt.month() as u8,
        dt.day() as u8,
        dt.hour() as u8,
        dt.minute() as u8,
        dt.second() as u8,
    ]
}

/// Decode the 6-byte date/time block to epoch seconds
pub fn decode_datetime(block: &[u8]) -> std::result::Result<i64, FrameError> {
    if block.len() < GT06_DATETIME_SIZE {
        return Err(FrameError::PayloadTooShort {
            kind: "date/time",
            len: block.len(),
        });
    }

    NaiveDate::from_ymd_opt(2000 + block[0] as i32, block[1] as u32, block[2] as u32)
        .and_then(|date| date.and_hms_opt(block[3] as u32, block[4] as u32, block[5] as u32))
        .map(|naive| naive.and_utc().timestamp())
        .ok_or(FrameError::InvalidDateTime)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_constants() {
        assert_eq!(GT06_START, [0x78, 0x78]);
        assert_eq!(GT06_STOP, [0x0D, 0x0A]);
        assert_eq!(GT06_MSG_LOGIN, 0x01);
        assert_eq!(GT06_MSG_LOCATION, 0x12);
        assert_eq!(GT06_MSG_WIFI_LOCATION, 0x69);
        assert_eq!(GT06_MIN_FRAME_SIZE, 10);
    }

    #[test]
    fn test_gt06_frame_length() {
        let frame = Gt06Frame::new(GT06_MSG_LOGIN, vec![0u8; 8], 1).unwrap();
        assert_eq!(frame.length(), 0x0D);

        let frame = Gt06Frame::new(GT06_MSG_LOCATION, vec![0u8; 18], 1).unwrap();
        assert_eq!(frame.length(), 23);
    }

    #[test]
    fn test_gt06_frame_payload_too_large() {
        assert!(Gt06Frame::new(GT06_MSG_LOCATION, vec![0u8; 251], 1).is_err());
        assert!(Gt06Frame::new(GT06_MSG_LOCATION, vec![0u8; 250], 1).is_ok());
    }

    #[test]
    fn test_serial_number_wraps_once_after_65536_frames() {
        let mut serial = SerialNumber::default();
        let start = serial.current();
        let mut wraps = 0;

        for _ in 0..65536 {
            let before = serial.current();
            serial.advance();
            assert_eq!(serial.current(), before.wrapping_add(1));
            if serial.current() < before {
                wraps += 1;
            }
        }

        assert_eq!(serial.current(), start);
        assert_eq!(wraps, 1);
    }

    #[test]
    fn test_serial_number_zero_is_legal() {
        let mut serial = SerialNumber(u16::MAX);
        serial.advance();
        assert_eq!(serial.current(), 0);
        serial.advance();
        assert_eq!(serial.current(), 1);
    }

    #[test]
    fn test_imei_to_bytes_pads_fifteen_digits() {
        let bytes = imei_to_bytes("868120145233604").unwrap();
        assert_eq!(bytes, [0x08, 0x68, 0x12, 0x01, 0x45, 0x23, 0x36, 0x04]);
    }

    #[test]
    fn test_imei_to_bytes_keeps_last_sixteen() {
        let bytes = imei_to_bytes("990123456789012345").unwrap();
        assert_eq!(bytes, [0x01, 0x23, 0x45, 0x67, 0x89, 0x01, 0x23, 0x45]);
    }

    #[test]
    fn test_imei_to_bytes_rejects_garbage() {
        assert!(imei_to_bytes("").is_err());
        assert!(imei_to_bytes("86812014523360X").is_err());
    }

    #[test]
    fn test_datetime_round_trip() {
        // 2024-03-15 12:34:56 UTC
        let ts = 1_710_506_096;
        let block = encode_datetime(ts);
        assert_eq!(block, [24, 3, 15, 12, 34, 56]);
        assert_eq!(decode_datetime(&block).unwrap(), ts);
    }

    #[test]
    fn test_decode_datetime_rejects_invalid_month() {
        assert_eq!(decode_datetime(&[24, 13, 1, 0, 0, 0]), Err(FrameError::InvalidDateTime));
    }
}
