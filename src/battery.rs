//! # Battery Monitor
//!
//! Battery voltage sampling, charge estimation and the battery lamp.
//!
//! This module handles:
//! - Converting cell voltage to a charge percentage via a discharge table
//! - Reading voltage and charger state from a `BatterySensor`
//! - The periodic battery loop that publishes status and drives the battery lamp

use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::Result;
use crate::indicator::{Lamp, LampMode, StatusIndicator};
use crate::power::PowerState;

/// Li-ion discharge curve as (volts, percent), highest voltage first
pub const VOLTAGE_TABLE: [(f32, u8); 22] = [
    (4.143, 100), (4.079, 95), (4.023, 90), (3.972, 85), (3.923, 80),
    (3.876, 75), (3.831, 70), (3.790, 65), (3.754, 60), (3.720, 55),
    (3.680, 50), (3.652, 45), (3.634, 40), (3.621, 35), (3.608, 30),
    (3.595, 25), (3.579, 20), (3.548, 15), (3.511, 10), (3.468, 5),
    (3.430, 0), (3.100, 0),
];

/// Estimate charge percentage from cell voltage
///
/// Linear interpolation between the two nearest table points, truncated to a
/// whole percent and clamped to 0..=100.
///
/// # Examples
///
/// ```
/// use asset_tracker::battery::percentage_from_voltage;
///
/// assert_eq!(percentage_from_voltage(4.2), 100);
/// assert_eq!(percentage_from_voltage(3.680), 50);
/// assert_eq!(percentage_from_voltage(3.0), 0);
/// ```
pub fn percentage_from_voltage(voltage: f32) -> u8 {
    let (v_max, _) = VOLTAGE_TABLE[0];
    let (v_min, _) = VOLTAGE_TABLE[VOLTAGE_TABLE.len() - 1];

    if voltage <= v_min {
        return 0;
    }
    if voltage >= v_max {
        return 100;
    }

    for pair in VOLTAGE_TABLE.windows(2) {
        let (v_high, p_high) = pair[0];
        let (v_low, p_low) = pair[1];

        if voltage >= v_low && voltage <= v_high {
            if v_high == v_low {
                return p_high;
            }
            let percent = p_low as f32
                + (voltage - v_low) * (p_high as f32 - p_low as f32) / (v_high - v_low);
            return percent.clamp(0.0, 100.0) as u8;
        }
    }

    0
}

/// Latest battery reading
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatteryStatus {
    /// 0-100
    pub percent: u8,
    pub charging: bool,
    /// Volts
    pub voltage: f32,
}

impl Default for BatteryStatus {
    /// Assume a full battery until the first reading
    fn default() -> Self {
        Self { percent: 100, charging: false, voltage: 0.0 }
    }
}

impl BatteryStatus {
    pub fn is_low(&self, threshold: u8) -> bool {
        self.percent < threshold
    }
}

/// Battery lamp mode for a reading
///
/// Charging blinks at 1 Hz, a low battery blinks at 4 Hz, otherwise steady on.
pub fn battery_lamp_mode(status: &BatteryStatus, low_percent: u8) -> LampMode {
    if status.charging {
        LampMode::Blink1Hz
    } else if status.is_low(low_percent) {
        LampMode::Blink4Hz
    } else {
        LampMode::On
    }
}

/// Battery voltage and charger hardware
#[cfg_attr(test, mockall::automock)]
pub trait BatterySensor: Send {
    /// Cell voltage in millivolts
    fn voltage_mv(&mut self) -> Result<u32>;

    /// Whether external power is charging the cell
    fn is_charging(&mut self) -> Result<bool>;
}

/// Linux power-supply class device (e.g. `/sys/class/power_supply/BAT0`)
#[derive(Debug, Clone)]
pub struct SysfsBattery {
    dir: PathBuf,
}

impl SysfsBattery {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    fn read_attr(&self, name: &str) -> Result<String> {
        Ok(fs::read_to_string(self.dir.join(name))?.trim().to_string())
    }
}

impl BatterySensor for SysfsBattery {
    fn voltage_mv(&mut self) -> Result<u32> {
        // voltage_now is reported in microvolts
        let raw = self.read_attr("voltage_now")?;
        let microvolts: u64 = raw.parse().map_err(|_| {
            std::io::Error::new(ErrorKind::InvalidData, format!("invalid voltage_now: {:?}", raw))
        })?;
        Ok((microvolts / 1000) as u32)
    }

    fn is_charging(&mut self) -> Result<bool> {
        Ok(self.read_attr("status")? == "Charging")
    }
}

/// Keeps the last good battery reading
pub struct BatteryMonitor {
    sensor: Box<dyn BatterySensor>,
    status: BatteryStatus,
}

impl BatteryMonitor {
    pub fn new(sensor: Box<dyn BatterySensor>) -> Self {
        Self { sensor, status: BatteryStatus::default() }
    }

    /// Sample the sensor
    ///
    /// A failed read keeps the previous value for that field.
    pub fn update(&mut self) -> BatteryStatus {
        match self.sensor.voltage_mv() {
            Ok(mv) if mv > 0 => {
                self.status.voltage = mv as f32 / 1000.0;
                self.status.percent = percentage_from_voltage(self.status.voltage);
            }
            Ok(_) => {}
            Err(e) => warn!("Battery voltage read failed: {}", e),
        }

        match self.sensor.is_charging() {
            Ok(charging) => self.status.charging = charging,
            Err(e) => warn!("Charger status read failed: {}", e),
        }

        self.status
    }
}

/// Set the battery lamp unless the tracker is asleep
///
/// The power state stays borrowed while the lamp is set, so a concurrent
/// transition to sleep waits and its own lamp mode lands last.
fn show_if_active(
    indicator: &StatusIndicator,
    power: &watch::Receiver<PowerState>,
    mode: LampMode,
) {
    let state = power.borrow();
    if *state == PowerState::Active {
        indicator.set_mode(Lamp::Battery, mode);
    }
}

/// Battery sampling loop
///
/// Publishes each reading on `status_tx` and drives the battery lamp while the
/// tracker is active; the lamp belongs to the orchestrator while sleeping.
pub async fn run_battery_loop(
    mut monitor: BatteryMonitor,
    interval: Duration,
    low_percent: u8,
    indicator: StatusIndicator,
    power: watch::Receiver<PowerState>,
    status_tx: watch::Sender<BatteryStatus>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let status = monitor.update();
                debug!(
                    "Battery: {}% {:.2}V{}",
                    status.percent,
                    status.voltage,
                    if status.charging { " (charging)" } else { "" }
                );
                show_if_active(&indicator, &power, battery_lamp_mode(&status, low_percent));
                status_tx.send_replace(status);
            }
        }
    }

    debug!("Battery loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TrackerError;

    #[test]
    fn test_percentage_table_points() {
        assert_eq!(percentage_from_voltage(4.143), 100);
        assert_eq!(percentage_from_voltage(3.923), 80);
        assert_eq!(percentage_from_voltage(3.430), 0);
    }

    #[test]
    fn test_percentage_interpolates() {
        // Halfway between 3.680 (50%) and 3.720 (55%)
        assert_eq!(percentage_from_voltage(3.700), 52);
    }

    #[test]
    fn test_percentage_clamps() {
        assert_eq!(percentage_from_voltage(5.0), 100);
        assert_eq!(percentage_from_voltage(3.2), 0);
        assert_eq!(percentage_from_voltage(0.0), 0);
    }

    #[test]
    fn test_percentage_monotonic() {
        let mut last = 0;
        let mut v = 3.0f32;
        while v < 4.3 {
            let p = percentage_from_voltage(v);
            assert!(p >= last, "{}V -> {}% after {}%", v, p, last);
            last = p;
            v += 0.005;
        }
    }

    #[test]
    fn test_battery_lamp_policy() {
        let charging = BatteryStatus { percent: 10, charging: true, voltage: 3.5 };
        assert_eq!(battery_lamp_mode(&charging, 20), LampMode::Blink1Hz);

        let low = BatteryStatus { percent: 19, charging: false, voltage: 3.57 };
        assert_eq!(battery_lamp_mode(&low, 20), LampMode::Blink4Hz);

        let ok = BatteryStatus { percent: 20, charging: false, voltage: 3.58 };
        assert_eq!(battery_lamp_mode(&ok, 20), LampMode::On);
    }

    #[test]
    fn test_monitor_update() {
        let mut sensor = MockBatterySensor::new();
        sensor.expect_voltage_mv().returning(|| Ok(3923));
        sensor.expect_is_charging().returning(|| Ok(true));

        let mut monitor = BatteryMonitor::new(Box::new(sensor));
        let status = monitor.update();

        assert_eq!(status.percent, 80);
        assert!(status.charging);
        assert!((status.voltage - 3.923).abs() < 1e-6);
    }

    #[test]
    fn test_monitor_keeps_last_value_on_read_error() {
        let mut sensor = MockBatterySensor::new();
        let mut first = true;
        sensor.expect_voltage_mv().returning(move || {
            if first {
                first = false;
                Ok(3680)
            } else {
                Err(std::io::Error::new(ErrorKind::NotFound, "gone").into())
            }
        });
        sensor.expect_is_charging().returning(|| Ok(false));

        let mut monitor = BatteryMonitor::new(Box::new(sensor));
        assert_eq!(monitor.update().percent, 50);
        assert_eq!(monitor.update().percent, 50);
    }

    #[test]
    fn test_sysfs_battery() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("voltage_now"), "3876000\n").unwrap();
        fs::write(dir.path().join("status"), "Charging\n").unwrap();

        let mut battery = SysfsBattery::new(dir.path());
        assert_eq!(battery.voltage_mv().unwrap(), 3876);
        assert!(battery.is_charging().unwrap());

        fs::write(dir.path().join("status"), "Discharging\n").unwrap();
        assert!(!battery.is_charging().unwrap());
    }

    #[test]
    fn test_sysfs_battery_bad_voltage() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("voltage_now"), "n/a\n").unwrap();

        let mut battery = SysfsBattery::new(dir.path());
        match battery.voltage_mv().unwrap_err() {
            TrackerError::Io(e) => assert_eq!(e.kind(), ErrorKind::InvalidData),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_sysfs_battery_missing_device() {
        let mut battery = SysfsBattery::new("/nonexistent/power_supply/BAT9");
        assert!(battery.voltage_mv().is_err());
        assert!(battery.is_charging().is_err());
    }

    #[test]
    fn test_sleep_lamp_not_overwritten() {
        let indicator = StatusIndicator::new();
        let (power_tx, power_rx) = watch::channel(PowerState::Active);

        show_if_active(&indicator, &power_rx, LampMode::On);
        assert_eq!(indicator.mode(Lamp::Battery), LampMode::On);

        // Sleep entry publishes the state, then sets its lamp
        power_tx.send_replace(PowerState::Sleeping);
        indicator.set_mode(Lamp::Battery, LampMode::BlinkSlow);

        show_if_active(&indicator, &power_rx, LampMode::Blink4Hz);
        assert_eq!(indicator.mode(Lamp::Battery), LampMode::BlinkSlow);
    }

    #[test]
    fn test_sleep_transition_waits_for_lamp_update() {
        let indicator = StatusIndicator::new();
        let (power_tx, power_rx) = watch::channel(PowerState::Active);

        let state = power_rx.borrow();
        let sleeper = {
            let indicator = indicator.clone();
            std::thread::spawn(move || {
                power_tx.send_replace(PowerState::Sleeping);
                indicator.set_mode(Lamp::Battery, LampMode::BlinkSlow);
            })
        };

        // The transition cannot publish while the state is borrowed
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(*state, PowerState::Active);
        indicator.set_mode(Lamp::Battery, LampMode::On);
        drop(state);

        sleeper.join().unwrap();
        assert_eq!(indicator.mode(Lamp::Battery), LampMode::BlinkSlow);
    }

    #[tokio::test(start_paused = true)]
    async fn test_battery_loop_drives_lamp_only_when_active() {
        let mut sensor = MockBatterySensor::new();
        sensor.expect_voltage_mv().returning(|| Ok(3511));
        sensor.expect_is_charging().returning(|| Ok(false));

        let indicator = StatusIndicator::new();
        let (power_tx, power_rx) = watch::channel(PowerState::Sleeping);
        let (status_tx, mut status_rx) = watch::channel(BatteryStatus::default());
        let cancel = CancellationToken::new();

        indicator.set_mode(Lamp::Battery, LampMode::BlinkSlow);
        let task = tokio::spawn(run_battery_loop(
            BatteryMonitor::new(Box::new(sensor)),
            Duration::from_secs(5),
            20,
            indicator.clone(),
            power_rx,
            status_tx,
            cancel.clone(),
        ));

        status_rx.changed().await.unwrap();
        assert_eq!(status_rx.borrow().percent, 10);
        assert_eq!(indicator.mode(Lamp::Battery), LampMode::BlinkSlow);

        power_tx.send_replace(PowerState::Active);
        status_rx.changed().await.unwrap();
        assert_eq!(indicator.mode(Lamp::Battery), LampMode::Blink4Hz);

        cancel.cancel();
        task.await.unwrap();
    }
}
