//! # JSON Telemetry Codec
//!
//! Body and header set for the HTTP uplink.
//!
//! This module handles:
//! - Mapping a `LocationRecord` to the flat JSON object the collector expects
//! - The fixed HTTP header set sent with every POST
//! - Classifying response status codes

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::location::{LocationRecord, LocationSource};

/// Media type of the request body
pub const CONTENT_TYPE: &str = "application/json";

/// Header carrying the device IMEI
pub const IMEI_HEADER: &str = "X-Device-IMEI";

/// User agent reported to the collector
pub const USER_AGENT: &str = concat!("asset-tracker/", env!("CARGO_PKG_VERSION"));

/// Flat JSON telemetry object
///
/// Field order is the key order on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRecord {
    pub imei: String,
    pub timestamp: i64,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub speed: f64,
    pub course: f64,
    pub satellites: u8,
    /// Battery percent
    pub battery: u8,
    pub charging: bool,
    pub source: LocationSource,
    pub accuracy: f64,
}

impl JsonRecord {
    pub fn new(record: &LocationRecord, imei: &str) -> Self {
        Self {
            imei: imei.to_string(),
            timestamp: record.timestamp,
            latitude: record.latitude,
            longitude: record.longitude,
            altitude: record.altitude,
            speed: record.speed,
            course: record.course,
            satellites: record.satellites,
            battery: record.battery_percent,
            charging: record.charging,
            source: record.source,
            accuracy: record.accuracy,
        }
    }

    /// Rebuild a location record
    ///
    /// Only positioned records travel as JSON, so the result is always valid.
    pub fn into_record(self) -> LocationRecord {
        LocationRecord {
            timestamp: self.timestamp,
            latitude: self.latitude,
            longitude: self.longitude,
            altitude: self.altitude,
            speed: self.speed,
            course: self.course,
            satellites: self.satellites,
            valid: true,
            source: self.source,
            accuracy: self.accuracy,
            battery_percent: self.battery,
            charging: self.charging,
            access_points: Vec::new(),
        }
    }
}

/// Encode a record as the JSON request body
///
/// # Examples
///
/// ```
/// use asset_tracker::json::encode_json;
/// use asset_tracker::location::{LocationRecord, LocationSource};
///
/// let record = LocationRecord {
///     timestamp: 1_710_506_096,
///     latitude: 55.75,
///     longitude: 37.61,
///     altitude: 0.0,
///     speed: 0.0,
///     course: 0.0,
///     satellites: 7,
///     valid: true,
///     source: LocationSource::Gps,
///     accuracy: 0.0,
///     battery_percent: 90,
///     charging: false,
///     access_points: Vec::new(),
/// };
/// let body = encode_json(&record, "868120145233604")?;
/// assert!(body.starts_with(r#"{"imei":"868120145233604","timestamp":1710506096"#));
/// # Ok::<(), asset_tracker::error::TrackerError>(())
/// ```
pub fn encode_json(record: &LocationRecord, imei: &str) -> Result<String> {
    Ok(serde_json::to_string(&JsonRecord::new(record, imei))?)
}

/// Decode a JSON request body
///
/// # Errors
///
/// Returns error if the body is not a complete telemetry object
pub fn decode_json(body: &str) -> Result<JsonRecord> {
    Ok(serde_json::from_str(body)?)
}

/// Fixed headers sent with every telemetry POST
///
/// `Content-Length` is derived from the body by the HTTP client.
pub fn request_headers(imei: &str) -> Vec<(&'static str, String)> {
    vec![
        ("Content-Type", CONTENT_TYPE.to_string()),
        (IMEI_HEADER, imei.to_string()),
        ("User-Agent", USER_AGENT.to_string()),
        ("Connection", "close".to_string()),
    ]
}

/// Whether the collector accepted the record
pub fn is_success_status(status: u16) -> bool {
    matches!(status, 200 | 201 | 204)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> LocationRecord {
        LocationRecord {
            timestamp: 1_710_506_096,
            latitude: -33.856784,
            longitude: 151.215297,
            altitude: 58.3,
            speed: 12.25,
            course: 181.5,
            satellites: 8,
            valid: true,
            source: LocationSource::Gps,
            accuracy: 0.0,
            battery_percent: 64,
            charging: true,
            access_points: Vec::new(),
        }
    }

    #[test]
    fn test_encode_json_key_order() {
        let body = encode_json(&sample_record(), "868120145233604").unwrap();
        let keys = [
            "imei", "timestamp", "latitude", "longitude", "altitude", "speed", "course",
            "satellites", "battery", "charging", "source", "accuracy",
        ];

        let positions: Vec<usize> = keys
            .iter()
            .map(|k| body.find(&format!("\"{}\":", k)).unwrap())
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]), "{}", body);
    }

    #[test]
    fn test_encode_json_values() {
        let body = encode_json(&sample_record(), "868120145233604").unwrap();
        let value: serde_json::Value = serde_json::from_str(&body).unwrap();

        assert_eq!(value["imei"], "868120145233604");
        assert_eq!(value["battery"], 64);
        assert_eq!(value["charging"], true);
        assert_eq!(value["source"], "gps");
        assert_eq!(value["satellites"], 8);
    }

    #[test]
    fn test_json_round_trip_is_exact() {
        let record = sample_record();
        let decoded = decode_json(&encode_json(&record, "1").unwrap()).unwrap();

        assert_eq!(decoded.imei, "1");
        assert_eq!(decoded.into_record(), record);
    }

    #[test]
    fn test_wifi_source_name() {
        let mut record = sample_record();
        record.source = LocationSource::Wifi;
        record.accuracy = 35.0;

        let body = encode_json(&record, "1").unwrap();
        assert!(body.contains(r#""source":"wifi""#));
        assert!(body.ends_with(r#""accuracy":35.0}"#));
    }

    #[test]
    fn test_decode_json_rejects_incomplete() {
        assert!(decode_json(r#"{"imei":"1"}"#).is_err());
        assert!(decode_json("not json").is_err());
    }

    #[test]
    fn test_request_headers() {
        let headers = request_headers("868120145233604");
        let get = |name: &str| {
            headers
                .iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| v.as_str())
        };

        assert_eq!(get("Content-Type"), Some("application/json"));
        assert_eq!(get("X-Device-IMEI"), Some("868120145233604"));
        assert_eq!(get("Connection"), Some("close"));
        assert!(get("User-Agent").unwrap().starts_with("asset-tracker/"));
    }

    #[test]
    fn test_is_success_status() {
        assert!(is_success_status(200));
        assert!(is_success_status(201));
        assert!(is_success_status(204));
        assert!(!is_success_status(202));
        assert!(!is_success_status(301));
        assert!(!is_success_status(404));
        assert!(!is_success_status(500));
    }
}
