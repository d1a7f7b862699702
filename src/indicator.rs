//! # Status Indicator
//!
//! Three status lamps rendered from one shared state by a single ticker task.
//!
//! This module handles:
//! - Lamp modes and their on/off timing
//! - The edge-triggered pulse overlay used while data is on the wire
//! - Rendering all lamps on a fixed tick and writing only changed outputs

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Lamp identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lamp {
    /// Position fix (red)
    Fix,
    /// Server link (blue)
    Link,
    /// Battery (yellow)
    Battery,
}

impl Lamp {
    pub const ALL: [Lamp; 3] = [Lamp::Fix, Lamp::Link, Lamp::Battery];

    fn index(self) -> usize {
        match self {
            Lamp::Fix => 0,
            Lamp::Link => 1,
            Lamp::Battery => 2,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Lamp::Fix => "fix",
            Lamp::Link => "link",
            Lamp::Battery => "battery",
        }
    }
}

/// Steady lamp pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LampMode {
    #[default]
    Off,
    On,
    /// 1000 ms period, 500 ms lit
    Blink1Hz,
    /// 250 ms period, 125 ms lit
    Blink4Hz,
    /// 5000 ms period, 500 ms lit
    BlinkSlow,
    /// 1000 ms period, 250 ms lit
    BlinkConnecting,
}

impl LampMode {
    /// `(period_ms, on_ms)` for blinking modes
    pub fn timing(self) -> Option<(u64, u64)> {
        match self {
            LampMode::Off | LampMode::On => None,
            LampMode::Blink1Hz => Some((1000, 500)),
            LampMode::Blink4Hz => Some((250, 125)),
            LampMode::BlinkSlow => Some((5000, 500)),
            LampMode::BlinkConnecting => Some((1000, 250)),
        }
    }

    /// Whether the lamp is lit `elapsed_ms` after the mode was entered
    pub fn is_lit(self, elapsed_ms: u64) -> bool {
        match self {
            LampMode::Off => false,
            LampMode::On => true,
            _ => match self.timing() {
                Some((period, on)) => elapsed_ms % period < on,
                None => false,
            },
        }
    }
}

/// Pulse overlay is drawn with the 4 Hz duty cycle
const PULSE_MODE: LampMode = LampMode::Blink4Hz;

#[derive(Debug, Clone, Copy)]
struct LampState {
    mode: LampMode,
    since: Instant,
    pulse_since: Option<Instant>,
}

impl LampState {
    fn new(now: Instant) -> Self {
        Self { mode: LampMode::Off, since: now, pulse_since: None }
    }

    fn is_lit(&self, now: Instant) -> bool {
        match self.pulse_since {
            Some(start) => PULSE_MODE.is_lit(elapsed_ms(start, now)),
            None => self.mode.is_lit(elapsed_ms(self.since, now)),
        }
    }
}

fn elapsed_ms(since: Instant, now: Instant) -> u64 {
    now.saturating_duration_since(since).as_millis() as u64
}

/// Shared handle to the three lamps
///
/// Cloning is cheap; every clone addresses the same state.
#[derive(Debug, Clone)]
pub struct StatusIndicator {
    lamps: Arc<Mutex<[LampState; 3]>>,
}

impl Default for StatusIndicator {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusIndicator {
    /// All lamps off
    pub fn new() -> Self {
        let now = Instant::now();
        Self { lamps: Arc::new(Mutex::new([LampState::new(now); 3])) }
    }

    fn lock(&self) -> MutexGuard<'_, [LampState; 3]> {
        self.lamps.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Set the steady mode of a lamp
    ///
    /// Setting the current mode again keeps the blink phase. During a pulse the
    /// new mode is stored and shown once the pulse stops.
    pub fn set_mode(&self, lamp: Lamp, mode: LampMode) {
        let mut lamps = self.lock();
        let state = &mut lamps[lamp.index()];
        if state.mode != mode {
            state.mode = mode;
            state.since = Instant::now();
        }
    }

    /// Steady mode of a lamp, ignoring any pulse
    pub fn mode(&self, lamp: Lamp) -> LampMode {
        self.lock()[lamp.index()].mode
    }

    /// Start the pulse overlay
    pub fn pulse_start(&self, lamp: Lamp) {
        let mut lamps = self.lock();
        let state = &mut lamps[lamp.index()];
        if state.pulse_since.is_none() {
            state.pulse_since = Some(Instant::now());
        }
    }

    /// Stop the pulse overlay and restore the steady mode
    pub fn pulse_stop(&self, lamp: Lamp) {
        self.lock()[lamp.index()].pulse_since = None;
    }

    pub fn is_pulsing(&self, lamp: Lamp) -> bool {
        self.lock()[lamp.index()].pulse_since.is_some()
    }

    /// Lit state of every lamp at `now`, in [`Lamp::ALL`] order
    pub fn render(&self, now: Instant) -> [bool; 3] {
        let lamps = self.lock();
        [lamps[0].is_lit(now), lamps[1].is_lit(now), lamps[2].is_lit(now)]
    }
}

/// Physical lamp driver
pub trait LampOutput: Send {
    fn set(&mut self, lit: bool);
}

/// Lamp stand-in that logs every transition
#[derive(Debug)]
pub struct TracingLamp {
    lamp: Lamp,
}

impl TracingLamp {
    pub fn new(lamp: Lamp) -> Self {
        Self { lamp }
    }
}

impl LampOutput for TracingLamp {
    fn set(&mut self, lit: bool) {
        trace!("Lamp {} {}", self.lamp.name(), if lit { "on" } else { "off" });
    }
}

/// Spawn the ticker that renders all lamps
///
/// `outputs` is indexed in [`Lamp::ALL`] order. An output is only written when
/// its lit state changes.
pub fn spawn_ticker(
    indicator: StatusIndicator,
    mut outputs: [Box<dyn LampOutput>; 3],
    tick: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(tick);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut last: [Option<bool>; 3] = [None; 3];

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                now = ticker.tick() => {
                    let lit = indicator.render(now);
                    for (i, output) in outputs.iter_mut().enumerate() {
                        if last[i] != Some(lit[i]) {
                            output.set(lit[i]);
                            last[i] = Some(lit[i]);
                        }
                    }
                }
            }
        }

        for output in outputs.iter_mut() {
            output.set(false);
        }
        debug!("Indicator ticker stopped");
    })
}
