//! # Power State Machine
//!
//! Active/Sleeping cycle driven by time since the last detected movement.
//!
//! Only the orchestrator mutates the machine; other tasks observe the state
//! through a `watch` channel.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::info;

/// Whether sampling subsystems are running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    Active,
    Sleeping,
}

/// Edge reported by the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    EnterSleep,
    Wake,
}

/// Sleep/wake bookkeeping
#[derive(Debug)]
pub struct PowerStateMachine {
    sleep_timeout: Duration,
    last_movement: Instant,
    sleeping_since: Option<Instant>,
    state_tx: watch::Sender<PowerState>,
}

impl PowerStateMachine {
    /// Start active, counting idle time from `now`
    pub fn new(sleep_timeout: Duration, now: Instant) -> Self {
        let (state_tx, _) = watch::channel(PowerState::Active);
        Self {
            sleep_timeout,
            last_movement: now,
            sleeping_since: None,
            state_tx,
        }
    }

    pub fn state(&self) -> PowerState {
        *self.state_tx.borrow()
    }

    /// Receiver that observes every state change
    pub fn subscribe(&self) -> watch::Receiver<PowerState> {
        self.state_tx.subscribe()
    }

    pub fn set_sleep_timeout(&mut self, sleep_timeout: Duration) {
        self.sleep_timeout = sleep_timeout;
    }

    /// When the current sleep began, if sleeping
    pub fn sleeping_since(&self) -> Option<Instant> {
        self.sleeping_since
    }

    /// Reset the idle timer
    pub fn record_movement(&mut self, now: Instant) {
        self.last_movement = now;
    }

    /// Evaluate the idle timer
    ///
    /// Returns `Some(EnterSleep)` once when the idle time reaches the sleep
    /// timeout. There is no autonomous wake; see [`force_wake`](Self::force_wake).
    pub fn tick(&mut self, now: Instant) -> Option<Transition> {
        if self.state() == PowerState::Sleeping {
            return None;
        }

        let idle = now.saturating_duration_since(self.last_movement);
        if idle < self.sleep_timeout {
            return None;
        }

        info!("No movement for {}s, entering sleep", idle.as_secs());
        self.sleeping_since = Some(now);
        self.state_tx.send_replace(PowerState::Sleeping);
        Some(Transition::EnterSleep)
    }

    /// Wake up (command received, or wake timer)
    ///
    /// Returns `Some(Wake)` only if sleeping. The idle timer restarts at `now`
    /// either way.
    pub fn force_wake(&mut self, now: Instant) -> Option<Transition> {
        self.last_movement = now;

        if self.state() == PowerState::Active {
            return None;
        }

        info!("Waking up");
        self.sleeping_since = None;
        self.state_tx.send_replace(PowerState::Active);
        Some(Transition::Wake)
    }
}
