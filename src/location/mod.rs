//! # Location Module
//!
//! Location records and the collaborators that produce them.
//!
//! This module handles:
//! - The `LocationRecord` snapshot that flows through the delivery pipeline
//! - WiFi access-point observations and MAC address parsing
//! - Collaborator traits for the satellite receiver, WiFi scanner and geolocation service
//! - Source arbitration and movement detection (see [`arbiter`])

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::battery::BatteryStatus;
use crate::error::Result;

pub mod arbiter;
pub mod geolocation;
pub mod sources;

/// Maximum number of access points carried by one observation batch
/// (bounded by the one-byte AP count of the WIFI_LOCATION frame)
pub const MAX_ACCESS_POINTS: usize = 15;

/// Where a location record came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocationSource {
    /// Satellite navigation fix
    Gps,
    /// WiFi access-point estimate
    Wifi,
}

impl LocationSource {
    /// Wire name used by the JSON protocol
    pub fn as_str(&self) -> &'static str {
        match self {
            LocationSource::Gps => "gps",
            LocationSource::Wifi => "wifi",
        }
    }
}

impl fmt::Display for LocationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 48-bit hardware address of a WiFi access point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

/// Error returned when a MAC address string cannot be parsed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid MAC address: {0}")]
pub struct ParseMacError(String);

impl FromStr for MacAddress {
    type Err = ParseMacError;

    /// Accepts six hex octets separated by `:` or `-`, in either case.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let mut octets = [0u8; 6];
        let mut parts = s.trim().split(|c| c == ':' || c == '-');

        for octet in octets.iter_mut() {
            let part = parts.next().ok_or_else(|| ParseMacError(s.to_string()))?;
            if part.len() != 2 {
                return Err(ParseMacError(s.to_string()));
            }
            *octet = u8::from_str_radix(part, 16).map_err(|_| ParseMacError(s.to_string()))?;
        }

        if parts.next().is_some() {
            return Err(ParseMacError(s.to_string()));
        }

        Ok(MacAddress(octets))
    }
}

impl Serialize for MacAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MacAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// One access point seen by a WiFi scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WifiObservation {
    pub mac: MacAddress,
    /// Signal strength in dBm (negative)
    pub signal: i16,
}

/// Position report from the satellite navigation collaborator
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LocationFix {
    #[serde(default)]
    pub valid: bool,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub altitude: f64,
    #[serde(default)]
    pub speed: f64,
    #[serde(default)]
    pub course: f64,
    #[serde(default)]
    pub satellites: u8,
    #[serde(default)]
    pub timestamp: i64,
}

impl LocationFix {
    /// Whether the receiver reported a confirmed fix
    pub fn is_fixed(&self) -> bool {
        self.valid
    }
}

/// Position estimate returned by a geolocation service
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoEstimate {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    /// Accuracy radius in meters
    pub accuracy: f64,
}

/// Immutable location snapshot produced once per sampling tick.
///
/// A record is moved from stage to stage (arbiter, uplink, offline buffer)
/// and never shared between tasks; the buffer hands out clones.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationRecord {
    /// Epoch seconds (UTC)
    pub timestamp: i64,
    pub latitude: f64,
    pub longitude: f64,
    /// Meters
    pub altitude: f64,
    /// km/h
    pub speed: f64,
    /// Degrees, 0-359
    pub course: f64,
    /// 0-15
    pub satellites: u8,
    /// True only for a confirmed fix or a resolved WiFi estimate
    pub valid: bool,
    pub source: LocationSource,
    /// Meters
    pub accuracy: f64,
    /// 0-100
    pub battery_percent: u8,
    pub charging: bool,
    /// Scan a WiFi record was derived from; empty for GPS records
    pub access_points: Vec<WifiObservation>,
}

impl LocationRecord {
    /// Build a GPS record from a receiver fix
    pub fn from_fix(fix: &LocationFix, battery: &BatteryStatus, now: i64) -> Self {
        Self {
            timestamp: now,
            latitude: fix.latitude,
            longitude: fix.longitude,
            altitude: fix.altitude,
            speed: fix.speed,
            course: fix.course,
            satellites: fix.satellites.min(15),
            valid: fix.is_fixed(),
            source: LocationSource::Gps,
            accuracy: 0.0,
            battery_percent: battery.percent,
            charging: battery.charging,
            access_points: Vec::new(),
        }
    }

    /// Build a WiFi record; `estimate` is `None` when geolocation did not resolve the scan
    pub fn from_wifi(
        access_points: Vec<WifiObservation>,
        estimate: Option<GeoEstimate>,
        battery: &BatteryStatus,
        now: i64,
    ) -> Self {
        let (latitude, longitude, altitude, accuracy) = match estimate {
            Some(e) => (e.latitude, e.longitude, e.altitude, e.accuracy),
            None => (0.0, 0.0, 0.0, 0.0),
        };

        Self {
            timestamp: now,
            latitude,
            longitude,
            altitude,
            speed: 0.0,
            course: 0.0,
            satellites: 0,
            valid: estimate.is_some(),
            source: LocationSource::Wifi,
            accuracy,
            battery_percent: battery.percent,
            charging: battery.charging,
            access_points,
        }
    }

    /// A WiFi record that only carries raw access points and no position
    pub fn is_unresolved_wifi(&self) -> bool {
        !self.valid && self.source == LocationSource::Wifi && !self.access_points.is_empty()
    }
}

/// Satellite navigation receiver
#[cfg_attr(test, mockall::automock)]
pub trait PositionSource: Send {
    /// Power the receiver up
    fn enable(&mut self) -> Result<()>;

    /// Power the receiver down
    fn disable(&mut self);

    /// Latest fix, or `None` when the receiver has no data at all
    fn get_fix(&mut self) -> Option<LocationFix>;
}

/// WiFi access-point scanner
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WifiScanner: Send {
    fn enable(&mut self) -> Result<()>;

    fn disable(&mut self);

    /// Run one scan; the caller bounds the wait
    async fn scan(&mut self) -> Result<Vec<WifiObservation>>;
}

/// Geolocation service resolving access points to a position
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Geolocator: Send + Sync {
    async fn locate(&self, access_points: &[WifiObservation]) -> Result<GeoEstimate>;
}
