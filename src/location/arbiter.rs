//! # Location Arbiter
//!
//! Picks a position source each sampling tick: satellite fix first, WiFi
//! access points as fallback.

use std::time::Duration;

use tracing::{debug, info, warn};

use super::{Geolocator, LocationRecord, PositionSource, WifiScanner, MAX_ACCESS_POINTS};
use crate::battery::BatteryStatus;
use crate::error::Result;

/// Speed above which the tracker counts as moving (km/h)
pub const MOVEMENT_SPEED_KMH: f64 = 1.0;

/// Coordinate change above which the tracker counts as moving (degrees, ~11 m)
pub const MOVEMENT_DELTA_DEG: f64 = 0.0001;

/// Whether `current` shows movement relative to the previous valid record
pub fn has_moved(current: &LocationRecord, previous: Option<&LocationRecord>) -> bool {
    let Some(previous) = previous else {
        return true;
    };

    if current.speed > MOVEMENT_SPEED_KMH {
        return true;
    }

    (current.latitude - previous.latitude).abs() > MOVEMENT_DELTA_DEG
        || (current.longitude - previous.longitude).abs() > MOVEMENT_DELTA_DEG
}

/// Arbitrates between the satellite receiver and WiFi scanning
pub struct LocationArbiter {
    gps: Box<dyn PositionSource>,
    wifi: Box<dyn WifiScanner>,
    geolocator: Option<Box<dyn Geolocator>>,
    wifi_fallback: bool,
    wifi_enabled: bool,
    scan_timeout: Duration,
}

impl LocationArbiter {
    /// # Arguments
    ///
    /// * `gps` - Satellite receiver
    /// * `wifi` - Access-point scanner
    /// * `geolocator` - Service resolving scans to positions; `None` keeps scans unresolved
    /// * `wifi_fallback` - Whether to scan when there is no satellite fix
    /// * `scan_timeout` - Upper bound on one scan
    pub fn new(
        gps: Box<dyn PositionSource>,
        wifi: Box<dyn WifiScanner>,
        geolocator: Option<Box<dyn Geolocator>>,
        wifi_fallback: bool,
        scan_timeout: Duration,
    ) -> Self {
        Self {
            gps,
            wifi,
            geolocator,
            wifi_fallback,
            wifi_enabled: false,
            scan_timeout,
        }
    }

    pub fn set_geolocator(&mut self, geolocator: Option<Box<dyn Geolocator>>) {
        self.geolocator = geolocator;
    }

    /// Whether the receiver currently reports a confirmed fix
    pub fn has_fix(&mut self) -> bool {
        self.gps.get_fix().is_some_and(|fix| fix.is_fixed())
    }

    /// Produce this tick's record
    ///
    /// `None` means no position could be obtained at all.
    pub async fn acquire(&mut self, battery: &BatteryStatus, now: i64) -> Option<LocationRecord> {
        if let Some(fix) = self.gps.get_fix().filter(|fix| fix.is_fixed()) {
            return Some(LocationRecord::from_fix(&fix, battery, now));
        }

        if !self.wifi_fallback {
            return None;
        }

        debug!("No satellite fix, trying WiFi");
        let access_points = self.scan().await?;

        let estimate = match &self.geolocator {
            Some(geolocator) => match geolocator.locate(&access_points).await {
                Ok(estimate) => {
                    info!(
                        "WiFi position {:.6}, {:.6} (±{:.0} m)",
                        estimate.latitude, estimate.longitude, estimate.accuracy
                    );
                    Some(estimate)
                }
                Err(e) => {
                    warn!("Geolocation failed: {}", e);
                    None
                }
            },
            None => None,
        };

        Some(LocationRecord::from_wifi(access_points, estimate, battery, now))
    }

    async fn scan(&mut self) -> Option<Vec<super::WifiObservation>> {
        if !self.wifi_enabled {
            if let Err(e) = self.wifi.enable() {
                warn!("WiFi enable failed: {}", e);
                return None;
            }
            self.wifi_enabled = true;
        }

        let mut access_points = match tokio::time::timeout(self.scan_timeout, self.wifi.scan()).await {
            Ok(Ok(aps)) => aps,
            Ok(Err(e)) => {
                warn!("WiFi scan failed: {}", e);
                return None;
            }
            Err(_) => {
                warn!("WiFi scan timed out after {:?}", self.scan_timeout);
                return None;
            }
        };

        if access_points.is_empty() {
            debug!("No WiFi access points found");
            return None;
        }

        // Keep the strongest access points
        access_points.sort_by(|a, b| b.signal.cmp(&a.signal));
        access_points.truncate(MAX_ACCESS_POINTS);
        debug!("Found {} WiFi access points", access_points.len());

        Some(access_points)
    }

    /// Turn off every radio (sleep entry)
    pub fn power_down(&mut self) {
        self.gps.disable();
        if self.wifi_enabled {
            self.wifi.disable();
            self.wifi_enabled = false;
        }
    }

    /// Turn the receiver back on (wake)
    pub fn power_up(&mut self) -> Result<()> {
        self.gps.enable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TrackerError;
    use crate::location::{
        GeoEstimate, LocationFix, LocationSource, MacAddress, MockGeolocator, MockPositionSource,
        MockWifiScanner, WifiObservation,
    };
    use async_trait::async_trait;

    fn fix(valid: bool) -> LocationFix {
        LocationFix {
            valid,
            latitude: 55.751244,
            longitude: 37.618423,
            altitude: 150.0,
            speed: 3.0,
            course: 90.0,
            satellites: if valid { 8 } else { 0 },
            timestamp: 0,
        }
    }

    fn aps(n: u8) -> Vec<WifiObservation> {
        (0..n)
            .map(|i| WifiObservation { mac: MacAddress([i; 6]), signal: -40 - i as i16 })
            .collect()
    }

    fn record(latitude: f64, longitude: f64, speed: f64) -> LocationRecord {
        LocationRecord {
            timestamp: 0,
            latitude,
            longitude,
            altitude: 0.0,
            speed,
            course: 0.0,
            satellites: 6,
            valid: true,
            source: LocationSource::Gps,
            accuracy: 0.0,
            battery_percent: 100,
            charging: false,
            access_points: Vec::new(),
        }
    }

    fn gps_returning(fix: Option<LocationFix>) -> Box<dyn PositionSource> {
        let mut gps = MockPositionSource::new();
        gps.expect_get_fix().returning(move || fix.clone());
        Box::new(gps)
    }

    fn unused_wifi() -> Box<dyn WifiScanner> {
        let mut wifi = MockWifiScanner::new();
        wifi.expect_scan().never();
        Box::new(wifi)
    }

    struct StalledScanner;

    #[async_trait]
    impl WifiScanner for StalledScanner {
        fn enable(&mut self) -> Result<()> {
            Ok(())
        }

        fn disable(&mut self) {}

        async fn scan(&mut self) -> Result<Vec<WifiObservation>> {
            std::future::pending().await
        }
    }

    #[test]
    fn test_movement_speed_threshold() {
        let previous = record(10.0, 20.0, 0.0);
        assert!(!has_moved(&record(10.0, 20.0, 0.5), Some(&previous)));
        assert!(has_moved(&record(10.0, 20.0, 1.5), Some(&previous)));
    }

    #[test]
    fn test_movement_coordinate_threshold() {
        let previous = record(10.0, 20.0, 0.0);
        assert!(!has_moved(&record(10.00005, 20.00005, 0.0), Some(&previous)));
        assert!(has_moved(&record(10.0002, 20.0, 0.0), Some(&previous)));
        assert!(has_moved(&record(10.0, 19.9998, 0.0), Some(&previous)));
    }

    #[test]
    fn test_first_record_counts_as_movement() {
        assert!(has_moved(&record(0.0, 0.0, 0.0), None));
    }

    #[tokio::test]
    async fn test_gps_fix_wins() {
        let mut arbiter = LocationArbiter::new(
            gps_returning(Some(fix(true))),
            unused_wifi(),
            None,
            true,
            Duration::from_secs(10),
        );

        let record = arbiter.acquire(&BatteryStatus::default(), 1_700_000_000).await.unwrap();
        assert!(record.valid);
        assert_eq!(record.source, LocationSource::Gps);
        assert_eq!(record.satellites, 8);
        assert_eq!(record.timestamp, 1_700_000_000);
        assert!(arbiter.has_fix());
    }

    #[tokio::test]
    async fn test_no_fix_and_wifi_disabled() {
        let mut arbiter = LocationArbiter::new(
            gps_returning(Some(fix(false))),
            unused_wifi(),
            None,
            false,
            Duration::from_secs(10),
        );

        assert!(arbiter.acquire(&BatteryStatus::default(), 0).await.is_none());
        assert!(!arbiter.has_fix());
    }

    #[tokio::test]
    async fn test_wifi_fallback_resolved() {
        let mut wifi = MockWifiScanner::new();
        wifi.expect_enable().times(1).returning(|| Ok(()));
        wifi.expect_scan().returning(|| Ok(aps(3)));

        let mut geo = MockGeolocator::new();
        geo.expect_locate()
            .withf(|aps| aps.len() == 3)
            .returning(|_| {
                Ok(GeoEstimate { latitude: 48.85, longitude: 2.35, altitude: 0.0, accuracy: 40.0 })
            });

        let mut arbiter = LocationArbiter::new(
            gps_returning(None),
            Box::new(wifi),
            Some(Box::new(geo)),
            true,
            Duration::from_secs(10),
        );

        let battery = BatteryStatus { percent: 42, charging: false, voltage: 3.65 };
        let record = arbiter.acquire(&battery, 5).await.unwrap();
        assert!(record.valid);
        assert_eq!(record.source, LocationSource::Wifi);
        assert_eq!(record.accuracy, 40.0);
        assert_eq!(record.battery_percent, 42);
        assert_eq!(record.access_points.len(), 3);

        // Scanner is only enabled once
        arbiter.acquire(&battery, 6).await.unwrap();
    }

    #[tokio::test]
    async fn test_geolocation_error_keeps_access_points() {
        let mut wifi = MockWifiScanner::new();
        wifi.expect_enable().returning(|| Ok(()));
        wifi.expect_scan().returning(|| Ok(aps(2)));

        let mut geo = MockGeolocator::new();
        geo.expect_locate()
            .returning(|_| Err(TrackerError::Uplink("service unavailable".to_string())));

        let mut arbiter = LocationArbiter::new(
            gps_returning(None),
            Box::new(wifi),
            Some(Box::new(geo)),
            true,
            Duration::from_secs(10),
        );

        let record = arbiter.acquire(&BatteryStatus::default(), 0).await.unwrap();
        assert!(!record.valid);
        assert!(record.is_unresolved_wifi());
        assert_eq!(record.access_points.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_scan_yields_none() {
        let mut wifi = MockWifiScanner::new();
        wifi.expect_enable().returning(|| Ok(()));
        wifi.expect_scan().returning(|| Ok(Vec::new()));

        let mut arbiter =
            LocationArbiter::new(gps_returning(None), Box::new(wifi), None, true, Duration::from_secs(10));

        assert!(arbiter.acquire(&BatteryStatus::default(), 0).await.is_none());
    }

    #[tokio::test]
    async fn test_scan_keeps_strongest_access_points() {
        let mut wifi = MockWifiScanner::new();
        wifi.expect_enable().returning(|| Ok(()));
        wifi.expect_scan().returning(|| Ok(aps(20)));

        let mut arbiter =
            LocationArbiter::new(gps_returning(None), Box::new(wifi), None, true, Duration::from_secs(10));

        let record = arbiter.acquire(&BatteryStatus::default(), 0).await.unwrap();
        assert_eq!(record.access_points.len(), MAX_ACCESS_POINTS);
        assert_eq!(record.access_points[0].signal, -40);
        assert!(record.access_points.iter().all(|ap| ap.signal >= -54));
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_timeout_yields_none() {
        let mut arbiter = LocationArbiter::new(
            gps_returning(None),
            Box::new(StalledScanner),
            None,
            true,
            Duration::from_secs(10),
        );

        assert!(arbiter.acquire(&BatteryStatus::default(), 0).await.is_none());
    }

    #[test]
    fn test_power_down_and_up() {
        let mut gps = MockPositionSource::new();
        gps.expect_disable().times(1).return_const(());
        gps.expect_enable().times(1).returning(|| Ok(()));

        let mut wifi = MockWifiScanner::new();
        wifi.expect_disable().never();

        let mut arbiter =
            LocationArbiter::new(Box::new(gps), Box::new(wifi), None, true, Duration::from_secs(10));

        // WiFi was never enabled, so it is not disabled either
        arbiter.power_down();
        arbiter.power_up().unwrap();
    }
}
