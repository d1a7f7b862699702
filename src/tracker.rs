//! # Tracker Orchestrator
//!
//! The sampling loop that ties the pipeline together.
//!
//! This module handles:
//! - Evaluating the power state machine every tick and applying sleep/wake
//! - Acquiring a location each update interval and delivering it
//! - Buffering records the uplink could not take, and draining them in order
//! - Applying operator commands (configuration changes, status, power off, reset)
//!
//! The tracker owns the uplink, the arbiter and the power machine outright.
//! The indicator and the buffer are shared handles.

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::battery::{battery_lamp_mode, BatteryStatus};
use crate::buffer::{OfflineBuffer, SystemMemory};
use crate::command::Command;
use crate::config::{ApnConfig, Config, ConfigStore};
use crate::delivery::{Delivery, DeliveryManager};
use crate::error::Result;
use crate::indicator::{Lamp, LampMode, StatusIndicator};
use crate::location::arbiter::{has_moved, LocationArbiter};
use crate::location::geolocation::HttpGeolocator;
use crate::location::{Geolocator, LocationRecord, PositionSource, WifiScanner};
use crate::power::{PowerState, PowerStateMachine, Transition};

/// Sampling loop period
const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Why the tracker stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    /// Operator asked to power off
    PowerOff,
    /// Operator asked for a restart
    Reset,
    /// Process shutdown (signal)
    Shutdown,
}

/// Sampling loop state
pub struct Tracker {
    store: Arc<dyn ConfigStore>,
    config: Config,
    arbiter: LocationArbiter,
    delivery: Option<DeliveryManager>,
    buffer: Arc<OfflineBuffer>,
    power: PowerStateMachine,
    indicator: StatusIndicator,
    battery: watch::Receiver<BatteryStatus>,
    last_valid: Option<LocationRecord>,
    last_report: Option<Instant>,
    fix_valid: bool,
}

fn boxed_geolocator(config: &Config) -> Result<Option<Box<dyn Geolocator>>> {
    let geolocator = HttpGeolocator::from_config(&config.wifi_location)?;
    Ok(geolocator.map(|g| Box::new(g) as Box<dyn Geolocator>))
}

fn is_deliverable(record: &LocationRecord, delivery: &DeliveryManager) -> bool {
    record.valid || (record.is_unresolved_wifi() && delivery.accepts_unresolved_wifi())
}

impl Tracker {
    /// Assemble a tracker from its parts
    ///
    /// `delivery` is `None` when no server is configured; records are then
    /// buffered until one is.
    pub fn new(
        store: Arc<dyn ConfigStore>,
        arbiter: LocationArbiter,
        delivery: Option<DeliveryManager>,
        buffer: Arc<OfflineBuffer>,
        indicator: StatusIndicator,
        battery: watch::Receiver<BatteryStatus>,
    ) -> Self {
        let config = store.get();
        let power = PowerStateMachine::new(
            Duration::from_secs(config.tracker.sleep_timeout_s),
            Instant::now(),
        );

        Self {
            store,
            config,
            arbiter,
            delivery,
            buffer,
            power,
            indicator,
            battery,
            last_valid: None,
            last_report: None,
            fix_valid: false,
        }
    }

    /// Build a tracker from the stored configuration
    ///
    /// # Arguments
    ///
    /// * `store` - Configuration store
    /// * `gps` - Satellite receiver
    /// * `wifi` - Access-point scanner
    /// * `indicator` - Shared lamp state
    /// * `battery` - Latest battery reading from the battery loop
    ///
    /// # Errors
    ///
    /// Returns error if an HTTP client cannot be built
    pub fn from_store(
        store: Arc<dyn ConfigStore>,
        gps: Box<dyn PositionSource>,
        wifi: Box<dyn WifiScanner>,
        indicator: StatusIndicator,
        battery: watch::Receiver<BatteryStatus>,
    ) -> Result<Self> {
        let config = store.get();

        let arbiter = LocationArbiter::new(
            gps,
            wifi,
            boxed_geolocator(&config)?,
            config.wifi_location.enabled,
            Duration::from_secs(config.wifi_location.scan_timeout_s),
        );

        let delivery =
            DeliveryManager::from_config(&config.server, &config.device.imei, indicator.clone())?;
        if delivery.is_none() {
            info!("No server configured, records will be buffered");
        }

        let buffer = Arc::new(OfflineBuffer::new(
            Box::new(SystemMemory::default()),
            config.buffer.min_free_fraction,
        ));

        Ok(Self::new(store, arbiter, delivery, buffer, indicator, battery))
    }

    /// Observe sleep/wake, e.g. for the battery loop
    pub fn subscribe_power(&self) -> watch::Receiver<PowerState> {
        self.power.subscribe()
    }

    /// Run until a command or `cancel` stops the tracker
    ///
    /// `commands` is borrowed so it survives a reset.
    pub async fn run(
        mut self,
        commands: &mut mpsc::Receiver<Command>,
        cancel: CancellationToken,
    ) -> Exit {
        info!("Tracker started, IMEI {}", self.config.device.imei);
        self.start().await;

        let mut ticker = tokio::time::interval(TICK_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let exit = loop {
            tokio::select! {
                _ = cancel.cancelled() => break Exit::Shutdown,
                Some(command) = commands.recv() => {
                    if let Some(exit) = self.handle_command(command).await {
                        break exit;
                    }
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.tick(Instant::now()).await {
                        let backoff = Duration::from_secs(self.config.tracker.error_backoff_s);
                        error!("Tracker tick failed: {}, retrying in {}s", e, backoff.as_secs());
                        tokio::select! {
                            _ = cancel.cancelled() => break Exit::Shutdown,
                            _ = tokio::time::sleep(backoff) => {}
                        }
                    }
                }
            }
        };

        self.stop();
        info!("Tracker stopped: {:?}", exit);
        exit
    }

    async fn start(&mut self) {
        self.indicator.set_mode(Lamp::Fix, LampMode::Blink1Hz);
        self.show_battery();

        if let Err(e) = self.arbiter.power_up() {
            warn!("Failed to power up fix receiver: {}", e);
        }

        if let Some(delivery) = self.delivery.as_mut() {
            delivery.connect().await;
        }
    }

    fn stop(&mut self) {
        if let Some(delivery) = self.delivery.as_mut() {
            delivery.disconnect();
        }
        self.arbiter.power_down();

        if !self.buffer.is_empty() {
            warn!("{} buffered records will be lost", self.buffer.len());
        }
    }

    /// One pass of the sampling loop
    async fn tick(&mut self, now: Instant) -> Result<()> {
        if let Some(Transition::EnterSleep) = self.power.tick(now) {
            self.enter_sleep();
        }

        if self.power.state() == PowerState::Sleeping {
            return self.check_wake_timer(now).await;
        }

        self.fix_valid = self.arbiter.has_fix();
        let fix_mode = if self.fix_valid { LampMode::On } else { LampMode::Blink1Hz };
        self.indicator.set_mode(Lamp::Fix, fix_mode);

        let interval = Duration::from_secs(self.config.tracker.update_interval_s);
        let due = self
            .last_report
            .map_or(true, |last| now.saturating_duration_since(last) >= interval);
        if due {
            self.last_report = Some(now);
            self.report(now).await;
        }

        let connected = self.delivery.as_ref().is_some_and(DeliveryManager::is_connected);
        if connected && !self.buffer.is_empty() {
            self.drain().await;
        }

        Ok(())
    }

    async fn check_wake_timer(&mut self, now: Instant) -> Result<()> {
        let wake_after = self.config.tracker.wake_after_s;
        if wake_after == 0 {
            return Ok(());
        }

        let elapsed = self
            .power
            .sleeping_since()
            .map(|since| now.saturating_duration_since(since));
        if elapsed.is_some_and(|elapsed| elapsed >= Duration::from_secs(wake_after)) {
            info!("Wake timer expired after {}s", wake_after);
            if let Some(Transition::Wake) = self.power.force_wake(now) {
                self.wake().await?;
            }
        }

        Ok(())
    }

    /// Acquire and deliver one record
    async fn report(&mut self, now: Instant) {
        let battery = *self.battery.borrow();
        let Some(record) = self.arbiter.acquire(&battery, Utc::now().timestamp()).await else {
            debug!("No location available");
            return;
        };

        if record.valid {
            if has_moved(&record, self.last_valid.as_ref()) {
                self.power.record_movement(now);
            }
            self.last_valid = Some(record.clone());
        }

        let Some(delivery) = self.delivery.as_mut() else {
            if record.valid {
                self.store_offline(record);
            }
            return;
        };

        if !is_deliverable(&record, delivery) {
            debug!("Uplink cannot carry an unresolved {} record, skipping", record.source);
            return;
        }

        match delivery.send(&record).await {
            Delivery::Delivered => {
                info!(
                    "Sent {} location: {:.6}, {:.6}",
                    record.source, record.latitude, record.longitude
                );
            }
            Delivery::Failed => {
                warn!("Send failed, buffering record");
                self.store_offline(record);
            }
        }
    }

    fn store_offline(&self, record: LocationRecord) {
        if !self.config.buffer.enabled {
            warn!("Buffering disabled, record dropped");
            return;
        }

        if !self.buffer.admit(record) {
            warn!("Buffer full, record dropped");
        }
    }

    /// Send buffered records oldest first, stopping at the first failure
    async fn drain(&mut self) {
        let Some(delivery) = self.delivery.as_mut() else {
            return;
        };

        let records = self.buffer.all();
        let pause = Duration::from_millis(self.config.buffer.drain_pause_ms);
        info!("Draining {} buffered records", records.len());

        let mut sent = 0;
        for (i, record) in records.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(pause).await;
            }

            if !is_deliverable(record, delivery) {
                debug!("Dropping buffered record the uplink cannot carry");
                sent += 1;
                continue;
            }

            match delivery.send(record).await {
                Delivery::Delivered => sent += 1,
                Delivery::Failed => {
                    warn!("Drain stopped after {} of {} records", sent, records.len());
                    break;
                }
            }
        }

        self.buffer.drain_prefix(sent);
        debug!("Buffer size after drain: {}", self.buffer.len());
    }

    fn enter_sleep(&mut self) {
        info!("Entering sleep mode");

        self.arbiter.power_down();
        if let Some(delivery) = self.delivery.as_mut() {
            delivery.disconnect();
        }
        self.fix_valid = false;

        self.indicator.set_mode(Lamp::Fix, LampMode::Off);
        self.indicator.set_mode(Lamp::Link, LampMode::Off);
        self.indicator.set_mode(Lamp::Battery, LampMode::BlinkSlow);
    }

    async fn wake(&mut self) -> Result<()> {
        info!("Exiting sleep mode");

        self.indicator.set_mode(Lamp::Fix, LampMode::Blink1Hz);
        self.show_battery();
        self.last_report = None;

        if let Some(delivery) = self.delivery.as_mut() {
            delivery.connect().await;
        }

        self.arbiter.power_up()
    }

    fn show_battery(&self) {
        let status = *self.battery.borrow();
        let mode = battery_lamp_mode(&status, self.config.battery.low_percent);
        self.indicator.set_mode(Lamp::Battery, mode);
    }

    /// Apply one operator command
    ///
    /// Returns the exit reason for `PowerOff` and `Reset`.
    async fn handle_command(&mut self, command: Command) -> Option<Exit> {
        info!("Command: {}", command.name());

        if let Some(Transition::Wake) = self.power.force_wake(Instant::now()) {
            if let Err(e) = self.wake().await {
                warn!("Wake failed: {}", e);
            }
        }

        match command {
            Command::ApnChanged { name, user, password } => {
                let apn = ApnConfig { name, user, password };
                if self.update_config(|config| config.device.apn = apn.clone()) {
                    info!("APN set to '{}'", apn.name);
                    self.reload_uplink();
                }
            }
            Command::ServerChanged { protocol, host, port } => {
                let applied = self.update_config(|config| {
                    if let Some(protocol) = protocol {
                        config.server.protocol = protocol;
                    }
                    config.server.host = host.clone();
                    config.server.port = port;
                });
                if applied {
                    info!("Server set to {}:{}", host, port);
                    self.reload_uplink();
                }
            }
            Command::WifiServerChanged { host, port, path } => {
                let applied = self.update_config(|config| {
                    config.wifi_location.host = host.clone();
                    config.wifi_location.port = port;
                    config.wifi_location.path = path.clone();
                });
                if applied {
                    info!("WiFi location server set to {}:{}{}", host, port, path);
                    match boxed_geolocator(&self.config) {
                        Ok(geolocator) => self.arbiter.set_geolocator(geolocator),
                        Err(e) => error!("Geolocation client setup failed: {}", e),
                    }
                }
            }
            Command::IntervalChanged(seconds) => {
                if self.update_config(|config| config.tracker.update_interval_s = seconds) {
                    info!("Update interval set to {}s", seconds);
                }
            }
            Command::GetStatus(reply) => {
                if reply.send(self.status_report()).is_err() {
                    debug!("Status requester went away");
                }
            }
            Command::PowerOff => return Some(Exit::PowerOff),
            Command::Reset => return Some(Exit::Reset),
        }

        None
    }

    /// Persist a change and refresh the cached configuration
    fn update_config(&mut self, mut change: impl FnMut(&mut Config)) -> bool {
        match self.store.update(&mut change) {
            Ok(()) => {
                self.config = self.store.get();
                self.power
                    .set_sleep_timeout(Duration::from_secs(self.config.tracker.sleep_timeout_s));
                true
            }
            Err(e) => {
                error!("Configuration update rejected: {}", e);
                false
            }
        }
    }

    /// Replace the uplink after a server or APN change
    ///
    /// The new uplink connects on its next send.
    fn reload_uplink(&mut self) {
        if let Some(mut delivery) = self.delivery.take() {
            delivery.disconnect();
        }

        match DeliveryManager::from_config(
            &self.config.server,
            &self.config.device.imei,
            self.indicator.clone(),
        ) {
            Ok(Some(delivery)) => {
                info!("Uplink switched to {:?}", delivery.protocol());
                self.delivery = Some(delivery);
            }
            Ok(None) => info!("No server configured, records will be buffered"),
            Err(e) => error!("Uplink setup failed: {}", e),
        }
    }

    /// Human-readable status, one item per line
    pub fn status_report(&self) -> String {
        let battery = *self.battery.borrow();
        let mut status = String::from("Tracker Status:\n");

        // Writing to a String cannot fail
        let _ = writeln!(
            status,
            "Battery: {}%{}",
            battery.percent,
            if battery.charging { " (Charging)" } else { "" }
        );
        let _ = writeln!(status, "Voltage: {:.2}V", battery.voltage);
        let sleeping = self.power.state() == PowerState::Sleeping;
        let _ = writeln!(status, "Sleep: {}", if sleeping { "Yes" } else { "No" });
        let _ = writeln!(status, "GPS: {}", if self.fix_valid { "Valid" } else { "Invalid" });

        if let Some(record) = &self.last_valid {
            let _ = writeln!(status, "Source: {}", record.source);
            let _ = writeln!(status, "Lat: {:.6}", record.latitude);
            let _ = writeln!(status, "Lon: {:.6}", record.longitude);
            let _ = writeln!(status, "Speed: {:.1} km/h", record.speed);
            let _ = writeln!(status, "Sats: {}", record.satellites);
        }

        let _ = writeln!(status, "Buffer: {} records", self.buffer.len());
        match &self.delivery {
            Some(delivery) => {
                let _ = writeln!(status, "Connected: {}", delivery.state());
            }
            None => {
                let _ = writeln!(status, "Connected: No server");
            }
        }

        match self.buffer.memory() {
            Some(memory) => {
                let _ = write!(status, "Memory free: {} bytes", memory.free);
            }
            None => {
                let _ = write!(status, "Memory free: unknown");
            }
        }

        status
    }
}
