//! # GT06 Packet Encoder
//!
//! Encodes login, location and WiFi location messages into GT06 frames.

use bytes::{BufMut, BytesMut};

use super::crc::crc16_ibm;
use super::protocol::*;
use crate::error::Result;
use crate::location::{LocationRecord, WifiObservation, MAX_ACCESS_POINTS};

/// Encode a frame into its wire representation
///
/// Layout: `START(2) LEN(1) TYPE(1) PAYLOAD SERIAL(2) CRC(2) STOP(2)`, with the
/// CRC computed over LEN through SERIAL.
///
/// # Examples
///
/// ```
/// use asset_tracker::gt06::encoder::encode_frame;
/// use asset_tracker::gt06::protocol::{Gt06Frame, GT06_MSG_LOGIN};
///
/// let frame = Gt06Frame::new(GT06_MSG_LOGIN, vec![0u8; 8], 1)?;
/// let bytes = encode_frame(&frame);
/// assert_eq!(bytes.len(), 18);
/// # Ok::<(), asset_tracker::error::TrackerError>(())
/// ```
pub fn encode_frame(frame: &Gt06Frame) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(frame.payload.len() + GT06_MIN_FRAME_SIZE);

    buf.put_slice(&GT06_START);
    buf.put_u8(frame.length());
    buf.put_u8(frame.message_type);
    buf.put_slice(&frame.payload);
    buf.put_u16(frame.serial);

    // Calculate CRC over LEN..=SERIAL (everything after START)
    let crc = crc16_ibm(&buf[GT06_START.len()..]);
    buf.put_u16(crc);
    buf.put_slice(&GT06_STOP);

    buf.to_vec()
}

/// Encode a LOGIN frame carrying the device IMEI
///
/// # Errors
///
/// Returns error if the IMEI is not a hex digit string
pub fn encode_login_frame(imei: &str, serial: u16) -> Result<Vec<u8>> {
    let payload = imei_to_bytes(imei)?.to_vec();
    let frame = Gt06Frame::new(GT06_MSG_LOGIN, payload, serial)?;
    Ok(encode_frame(&frame))
}

/// Encode the 18-byte LOCATION payload
///
/// Coordinates are sent as magnitudes; the hemisphere travels in bits 10
/// (south) and 11 (west) of the course/status word next to the valid flag
/// in bit 12.
pub fn encode_location_payload(record: &LocationRecord) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(GT06_LOCATION_PAYLOAD_SIZE);
    let valid = u8::from(record.valid);

    buf.put_slice(&encode_datetime(record.timestamp));
    buf.put_u8((record.satellites.min(15) << 4) | (valid << 3));
    buf.put_u32(scale_coordinate(record.latitude));
    buf.put_u32(scale_coordinate(record.longitude));

    // Speed is truncated to the one-byte range
    buf.put_u8(record.speed.clamp(0.0, 255.0) as u8);

    let mut course = (record.course.max(0.0) as u16) & GT06_COURSE_MASK;
    if record.latitude < 0.0 {
        course |= GT06_SOUTH_BIT;
    }
    if record.longitude < 0.0 {
        course |= GT06_WEST_BIT;
    }
    if record.valid {
        course |= GT06_VALID_BIT;
    }
    buf.put_u16(course);

    buf.to_vec()
}

/// Encode a LOCATION frame
pub fn encode_location_frame(record: &LocationRecord, serial: u16) -> Vec<u8> {
    encode_frame(&Gt06Frame {
        message_type: GT06_MSG_LOCATION,
        payload: encode_location_payload(record),
        serial,
    })
}

/// Encode the WIFI_LOCATION payload
///
/// At most [`MAX_ACCESS_POINTS`] entries are written; the rest are dropped.
pub fn encode_wifi_location_payload(access_points: &[WifiObservation], timestamp: i64) -> Vec<u8> {
    let count = access_points.len().min(MAX_ACCESS_POINTS);
    let mut buf =
        BytesMut::with_capacity(1 + count * GT06_WIFI_ENTRY_SIZE + GT06_DATETIME_SIZE);

    buf.put_u8(count as u8);
    for ap in &access_points[..count] {
        buf.put_slice(&ap.mac.octets());
        buf.put_u8(ap.signal.unsigned_abs().min(u8::MAX as u16) as u8);
    }
    buf.put_slice(&encode_datetime(timestamp));

    buf.to_vec()
}

/// Encode a WIFI_LOCATION frame
pub fn encode_wifi_location_frame(
    access_points: &[WifiObservation],
    timestamp: i64,
    serial: u16,
) -> Vec<u8> {
    encode_frame(&Gt06Frame {
        message_type: GT06_MSG_WIFI_LOCATION,
        payload: encode_wifi_location_payload(access_points, timestamp),
        serial,
    })
}

/// Encode a record with the message type that fits it
///
/// Unresolved WiFi records go out as WIFI_LOCATION so the collector can
/// resolve the access points; everything else is a LOCATION frame.
pub fn encode_record_frame(record: &LocationRecord, serial: u16) -> Vec<u8> {
    if record.is_unresolved_wifi() {
        encode_wifi_location_frame(&record.access_points, record.timestamp, serial)
    } else {
        encode_location_frame(record, serial)
    }
}

fn scale_coordinate(degrees: f64) -> u32 {
    (degrees.abs() * GT06_COORD_SCALE).round() as u32
}
