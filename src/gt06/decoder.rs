//! # GT06 Packet Decoder
//!
//! Validates GT06 frames and decodes login, location and WiFi location payloads.

use super::crc::crc16_ibm;
use super::protocol::*;
use crate::error::FrameError;
use crate::location::{MacAddress, WifiObservation};

/// Decode a complete GT06 frame
///
/// # Errors
///
/// Returns a [`FrameError`] if:
/// - Frame is shorter than the minimum frame size
/// - Start or stop marker is wrong
/// - LEN does not match the frame size
/// - CRC check fails
pub fn decode_frame(frame: &[u8]) -> Result<Gt06Frame, FrameError> {
    if frame.len() < GT06_MIN_FRAME_SIZE {
        return Err(FrameError::TooShort(frame.len()));
    }

    if frame[0..2] != GT06_START {
        return Err(FrameError::BadStart([frame[0], frame[1]]));
    }

    let stop = [frame[frame.len() - 2], frame[frame.len() - 1]];
    if stop != GT06_STOP {
        return Err(FrameError::BadStop(stop));
    }

    let declared = frame[2] as usize;
    let actual = frame.len() - GT06_FRAMING_OVERHEAD;
    if declared != actual {
        return Err(FrameError::LengthMismatch { declared, actual });
    }

    // CRC sits right before STOP and covers LEN..=SERIAL
    let crc_pos = frame.len() - 4;
    let received = u16::from_be_bytes([frame[crc_pos], frame[crc_pos + 1]]);
    let expected = crc16_ibm(&frame[2..crc_pos]);
    if expected != received {
        return Err(FrameError::CrcMismatch { expected, received });
    }

    let serial_pos = crc_pos - 2;
    Ok(Gt06Frame {
        message_type: frame[3],
        payload: frame[4..serial_pos].to_vec(),
        serial: u16::from_be_bytes([frame[serial_pos], frame[serial_pos + 1]]),
    })
}

/// Decode a LOGIN payload back to its 16 hex digits
pub fn decode_login(payload: &[u8]) -> Result<String, FrameError> {
    if payload.len() < GT06_IMEI_SIZE {
        return Err(FrameError::PayloadTooShort {
            kind: "login",
            len: payload.len(),
        });
    }

    Ok(payload[..GT06_IMEI_SIZE]
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect())
}

/// Decode a LOCATION payload
pub fn decode_location(payload: &[u8]) -> Result<LocationPayload, FrameError> {
    if payload.len() < GT06_LOCATION_PAYLOAD_SIZE {
        return Err(FrameError::PayloadTooShort {
            kind: "location",
            len: payload.len(),
        });
    }

    let timestamp = decode_datetime(&payload[0..6])?;
    let satellites = payload[6] >> 4;
    let valid = payload[6] & 0x08 != 0;

    let lat_raw = u32::from_be_bytes([payload[7], payload[8], payload[9], payload[10]]);
    let lon_raw = u32::from_be_bytes([payload[11], payload[12], payload[13], payload[14]]);
    let speed = payload[15];
    let course_field = u16::from_be_bytes([payload[16], payload[17]]);

    let mut latitude = lat_raw as f64 / GT06_COORD_SCALE;
    let mut longitude = lon_raw as f64 / GT06_COORD_SCALE;
    if course_field & GT06_SOUTH_BIT != 0 {
        latitude = -latitude;
    }
    if course_field & GT06_WEST_BIT != 0 {
        longitude = -longitude;
    }

    Ok(LocationPayload {
        timestamp,
        satellites,
        valid,
        latitude,
        longitude,
        speed,
        course: course_field & GT06_COURSE_MASK,
    })
}

/// Decode a WIFI_LOCATION payload
pub fn decode_wifi_location(payload: &[u8]) -> Result<WifiLocationPayload, FrameError> {
    let too_short = || FrameError::PayloadTooShort {
        kind: "wifi location",
        len: payload.len(),
    };

    let count = *payload.first().ok_or_else(too_short)? as usize;
    let needed = 1 + count * GT06_WIFI_ENTRY_SIZE + GT06_DATETIME_SIZE;
    if payload.len() < needed {
        return Err(too_short());
    }

    let access_points = payload[1..1 + count * GT06_WIFI_ENTRY_SIZE]
        .chunks_exact(GT06_WIFI_ENTRY_SIZE)
        .map(|entry| {
            let mut mac = [0u8; 6];
            mac.copy_from_slice(&entry[..6]);
            WifiObservation {
                mac: MacAddress(mac),
                signal: -(entry[6] as i16),
            }
        })
        .collect();

    let dt_pos = 1 + count * GT06_WIFI_ENTRY_SIZE;
    let timestamp = decode_datetime(&payload[dt_pos..dt_pos + GT06_DATETIME_SIZE])?;

    Ok(WifiLocationPayload {
        access_points,
        timestamp,
    })
}
