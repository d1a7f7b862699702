//! # Configuration Module
//!
//! Handles loading, validating and persisting tracker configuration from TOML files.

use serde::de::Error;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::command::DEFAULT_WIFI_PATH;
use crate::error::{Result, TrackerError};

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub wifi_location: WifiLocationConfig,
    #[serde(default)]
    pub gps: GpsConfig,
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub buffer: BufferConfig,
    #[serde(default)]
    pub battery: BatteryConfig,
    #[serde(default)]
    pub indicator: IndicatorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Device identity and cellular data settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    #[serde(default = "default_imei")]
    pub imei: String,

    #[serde(default)]
    pub apn: ApnConfig,
}

/// Packet data access point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApnConfig {
    #[serde(default = "default_apn_name")]
    pub name: String,

    #[serde(default)]
    pub user: String,

    #[serde(default)]
    pub password: String,
}

/// Uplink protocol spoken to the collector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerProtocol {
    Gt06,
    Http,
}

/// Collector server
///
/// An empty host means no server is configured and records are buffered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_protocol")]
    pub protocol: ServerProtocol,

    #[serde(default)]
    pub host: String,

    #[serde(default)]
    pub port: u16,

    /// HTTP only
    #[serde(default = "default_server_path")]
    pub path: String,

    /// HTTP only
    #[serde(default)]
    pub tls: bool,

    #[serde(default = "default_connect_timeout_s")]
    pub connect_timeout_s: u64,

    #[serde(default = "default_ack_timeout_s")]
    pub ack_timeout_s: u64,
}

/// Request/response format of the geolocation service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeolocationFormat {
    /// `{"wifiAccessPoints":[{"mac","rssi"}]}` → `{latitude, longitude, accuracy}`
    Custom,
    /// `{"wifiAccessPoints":[{"macAddress","signalStrength"}]}` → `{"location":{lat,lng},"accuracy"}`
    Mls,
}

/// WiFi fallback and geolocation service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WifiLocationConfig {
    #[serde(default = "default_wifi_enabled")]
    pub enabled: bool,

    /// Geolocation service host; empty sends raw access points to the collector
    #[serde(default)]
    pub host: String,

    #[serde(default = "default_geolocation_port")]
    pub port: u16,

    #[serde(default = "default_geolocation_path")]
    pub path: String,

    #[serde(default)]
    pub tls: bool,

    #[serde(default = "default_geolocation_format")]
    pub format: GeolocationFormat,

    #[serde(default = "default_scan_timeout_s")]
    pub scan_timeout_s: u64,

    #[serde(default = "default_geolocation_timeout_s")]
    pub timeout_s: u64,
}

/// Satellite receiver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct GpsConfig {
    /// JSON-lines file of fixes replayed in place of a receiver
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replay_file: Option<PathBuf>,
}

/// Sampling loop timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerConfig {
    #[serde(default = "default_update_interval_s")]
    pub update_interval_s: u64,

    #[serde(default = "default_sleep_timeout_s")]
    pub sleep_timeout_s: u64,

    /// Seconds asleep before a forced wake; 0 sleeps until a command arrives
    #[serde(default)]
    pub wake_after_s: u64,

    #[serde(default = "default_error_backoff_s")]
    pub error_backoff_s: u64,
}

/// Offline buffer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferConfig {
    #[serde(default = "default_buffer_enabled")]
    pub enabled: bool,

    /// Minimum free memory fraction required to admit a record
    #[serde(default = "default_min_free_fraction")]
    pub min_free_fraction: f64,

    #[serde(default = "default_drain_pause_ms")]
    pub drain_pause_ms: u64,
}

/// Battery monitor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatteryConfig {
    #[serde(default = "default_battery_poll_interval_s")]
    pub poll_interval_s: u64,

    #[serde(default = "default_low_percent")]
    pub low_percent: u8,

    #[serde(default = "default_power_supply_dir")]
    pub power_supply_dir: PathBuf,
}

/// Status lamps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorConfig {
    #[serde(default = "default_indicator_tick_ms")]
    pub tick_ms: u64,
}

/// Log output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for daily rolling log files; stdout only when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

// Default value functions
fn default_imei() -> String { "000000000000000".to_string() }
fn default_apn_name() -> String { "internet".to_string() }

fn default_protocol() -> ServerProtocol { ServerProtocol::Gt06 }
fn default_server_path() -> String { "/api/location".to_string() }
fn default_connect_timeout_s() -> u64 { 10 }
fn default_ack_timeout_s() -> u64 { 5 }

fn default_wifi_enabled() -> bool { true }
fn default_geolocation_port() -> u16 { 80 }
fn default_geolocation_path() -> String { DEFAULT_WIFI_PATH.to_string() }
fn default_geolocation_format() -> GeolocationFormat { GeolocationFormat::Custom }
fn default_scan_timeout_s() -> u64 { 10 }
fn default_geolocation_timeout_s() -> u64 { 10 }

fn default_update_interval_s() -> u64 { 10 }
fn default_sleep_timeout_s() -> u64 { 1800 }
fn default_error_backoff_s() -> u64 { 5 }

fn default_buffer_enabled() -> bool { true }
fn default_min_free_fraction() -> f64 { 0.10 }
fn default_drain_pause_ms() -> u64 { 100 }

fn default_battery_poll_interval_s() -> u64 { 5 }
fn default_low_percent() -> u8 { 20 }
fn default_power_supply_dir() -> PathBuf { PathBuf::from("/sys/class/power_supply/BAT0") }

fn default_indicator_tick_ms() -> u64 { 25 }

fn default_log_level() -> String { "info".to_string() }

impl Default for DeviceConfig {
    fn default() -> Self {
        Self { imei: default_imei(), apn: ApnConfig::default() }
    }
}

impl Default for ApnConfig {
    fn default() -> Self {
        Self { name: default_apn_name(), user: String::new(), password: String::new() }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            protocol: default_protocol(),
            host: String::new(),
            port: 0,
            path: default_server_path(),
            tls: false,
            connect_timeout_s: default_connect_timeout_s(),
            ack_timeout_s: default_ack_timeout_s(),
        }
    }
}

impl Default for WifiLocationConfig {
    fn default() -> Self {
        Self {
            enabled: default_wifi_enabled(),
            host: String::new(),
            port: default_geolocation_port(),
            path: default_geolocation_path(),
            tls: false,
            format: default_geolocation_format(),
            scan_timeout_s: default_scan_timeout_s(),
            timeout_s: default_geolocation_timeout_s(),
        }
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            update_interval_s: default_update_interval_s(),
            sleep_timeout_s: default_sleep_timeout_s(),
            wake_after_s: 0,
            error_backoff_s: default_error_backoff_s(),
        }
    }
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            enabled: default_buffer_enabled(),
            min_free_fraction: default_min_free_fraction(),
            drain_pause_ms: default_drain_pause_ms(),
        }
    }
}

impl Default for BatteryConfig {
    fn default() -> Self {
        Self {
            poll_interval_s: default_battery_poll_interval_s(),
            low_percent: default_low_percent(),
            power_supply_dir: default_power_supply_dir(),
        }
    }
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self { tick_ms: default_indicator_tick_ms() }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level(), dir: None }
    }
}

impl ServerConfig {
    /// Whether a collector is configured at all
    pub fn is_configured(&self) -> bool {
        !self.host.is_empty() && self.port != 0
    }

    /// Full URL for the HTTP uplink
    pub fn http_url(&self) -> String {
        let scheme = if self.tls { "https" } else { "http" };
        format!("{}://{}:{}{}", scheme, self.host, self.port, self.path)
    }
}

impl WifiLocationConfig {
    /// Whether a geolocation service is configured
    pub fn has_service(&self) -> bool {
        !self.host.is_empty()
    }

    pub fn service_url(&self) -> String {
        let scheme = if self.tls { "https" } else { "http" };
        format!("{}://{}:{}{}", scheme, self.host, self.port, self.path)
    }
}

fn config_error(msg: impl std::fmt::Display) -> TrackerError {
    TrackerError::Config(toml::de::Error::custom(msg))
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use asset_tracker::config::Config;
    ///
    /// let config = Config::load("config/tracker.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        let imei = &self.device.imei;
        if imei.is_empty() || imei.len() > 16 || !imei.chars().all(|c| c.is_ascii_digit()) {
            return Err(config_error("imei must be 1 to 16 decimal digits"));
        }

        // Server may be left unset (records are buffered), but not half-set
        if !self.server.host.is_empty() && self.server.port == 0 {
            return Err(config_error("server port must be set when host is set"));
        }

        if !self.server.path.starts_with('/') {
            return Err(config_error("server path must start with '/'"));
        }

        if self.server.connect_timeout_s == 0 || self.server.connect_timeout_s > 120 {
            return Err(config_error("connect_timeout_s must be between 1 and 120"));
        }

        if self.server.ack_timeout_s == 0 || self.server.ack_timeout_s > 60 {
            return Err(config_error("ack_timeout_s must be between 1 and 60"));
        }

        if self.wifi_location.has_service() && self.wifi_location.port == 0 {
            return Err(config_error("wifi_location port must be set when host is set"));
        }

        if !self.wifi_location.path.starts_with('/') {
            return Err(config_error("wifi_location path must start with '/'"));
        }

        if self.wifi_location.scan_timeout_s == 0 || self.wifi_location.timeout_s == 0 {
            return Err(config_error("wifi_location timeouts must be greater than 0"));
        }

        if self.tracker.update_interval_s == 0 || self.tracker.update_interval_s > 86_400 {
            return Err(config_error("update_interval_s must be between 1 and 86400"));
        }

        if self.tracker.sleep_timeout_s == 0 {
            return Err(config_error("sleep_timeout_s must be greater than 0"));
        }

        if self.tracker.error_backoff_s == 0 || self.tracker.error_backoff_s > 300 {
            return Err(config_error("error_backoff_s must be between 1 and 300"));
        }

        if !(0.0..=1.0).contains(&self.buffer.min_free_fraction) {
            return Err(config_error("min_free_fraction must be between 0.0 and 1.0"));
        }

        if self.buffer.drain_pause_ms > 10_000 {
            return Err(config_error("drain_pause_ms must be at most 10000"));
        }

        if self.battery.poll_interval_s == 0 {
            return Err(config_error("battery poll_interval_s must be greater than 0"));
        }

        if self.battery.low_percent > 100 {
            return Err(config_error("low_percent must be between 0 and 100"));
        }

        if self.indicator.tick_ms == 0 || self.indicator.tick_ms > 1000 {
            return Err(config_error("indicator tick_ms must be between 1 and 1000"));
        }

        if !["trace", "debug", "info", "warn", "error"].contains(&self.logging.level.as_str()) {
            return Err(config_error(
                "logging level must be one of: trace, debug, info, warn, error",
            ));
        }

        Ok(())
    }
}

/// Persistent configuration storage
pub trait ConfigStore: Send + Sync {
    /// Snapshot of the current configuration
    fn get(&self) -> Config;

    /// Apply a change, validate it, persist it and make it current
    ///
    /// On error the current configuration is left untouched.
    fn update(&self, change: &mut dyn FnMut(&mut Config)) -> Result<()>;
}

/// TOML file backed configuration store
#[derive(Debug)]
pub struct FileConfigStore {
    path: PathBuf,
    current: RwLock<Config>,
}

impl FileConfigStore {
    /// Open the store, loading the file if it exists
    ///
    /// A missing file yields the default configuration, which is written on
    /// the first update.
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or fails validation
    pub fn open<P: Into<PathBuf>>(path: P) -> Result<Self> {
        let path = path.into();
        let current = if path.exists() {
            Config::load(&path)?
        } else {
            Config::default()
        };

        Ok(Self { path, current: RwLock::new(current) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, config: &Config) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(&self.path, toml::to_string_pretty(config)?)?;
        Ok(())
    }
}

impl ConfigStore for FileConfigStore {
    fn get(&self) -> Config {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn update(&self, change: &mut dyn FnMut(&mut Config)) -> Result<()> {
        let mut guard = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let mut next = guard.clone();
        change(&mut next);
        next.validate()?;
        self.persist(&next)?;
        *guard = next;
        Ok(())
    }
}
