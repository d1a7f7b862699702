//! Host stand-ins for the satellite receiver and WiFi scanner

use std::fs;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::info;

use super::{LocationFix, PositionSource, WifiObservation, WifiScanner};
use crate::error::Result;

/// Replays fixes from a JSON-lines file, one per `step`, wrapping at the end
///
/// Each line is a JSON object with `latitude` and `longitude` and optional
/// `valid`, `altitude`, `speed`, `course`, `satellites`, `timestamp`.
#[derive(Debug)]
pub struct ReplayFixSource {
    fixes: Vec<LocationFix>,
    step: Duration,
    started: Instant,
    enabled: bool,
}

impl ReplayFixSource {
    pub fn new(fixes: Vec<LocationFix>, step: Duration) -> Self {
        Self {
            fixes,
            step: step.max(Duration::from_millis(1)),
            started: Instant::now(),
            enabled: true,
        }
    }

    /// # Errors
    ///
    /// Returns error if the file cannot be read or a line is not a fix
    pub fn load<P: AsRef<Path>>(path: P, step: Duration) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref())?;
        let fixes = contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| serde_json::from_str::<LocationFix>(line))
            .collect::<std::result::Result<Vec<LocationFix>, _>>()?;

        info!("Loaded {} fixes from {}", fixes.len(), path.as_ref().display());
        Ok(Self::new(fixes, step))
    }
}

impl PositionSource for ReplayFixSource {
    fn enable(&mut self) -> Result<()> {
        if !self.enabled {
            self.enabled = true;
            self.started = Instant::now();
        }
        Ok(())
    }

    fn disable(&mut self) {
        self.enabled = false;
    }

    fn get_fix(&mut self) -> Option<LocationFix> {
        if !self.enabled || self.fixes.is_empty() {
            return None;
        }

        let steps = self.started.elapsed().as_millis() / self.step.as_millis();
        let index = (steps % self.fixes.len() as u128) as usize;
        Some(self.fixes[index].clone())
    }
}

/// Receiver that never reports data
#[derive(Debug, Default)]
pub struct NullFixSource;

impl PositionSource for NullFixSource {
    fn enable(&mut self) -> Result<()> {
        Ok(())
    }

    fn disable(&mut self) {}

    fn get_fix(&mut self) -> Option<LocationFix> {
        None
    }
}

/// Scanner that never sees an access point
#[derive(Debug, Default)]
pub struct NullWifiScanner;

#[async_trait]
impl WifiScanner for NullWifiScanner {
    fn enable(&mut self) -> Result<()> {
        Ok(())
    }

    fn disable(&mut self) {}

    async fn scan(&mut self) -> Result<Vec<WifiObservation>> {
        Ok(Vec::new())
    }
}
