//! # Asset Tracker Library
//!
//! Telemetry agent for a cellular/GPS asset tracker.
//!
//! This library acquires positions (satellite fix first, WiFi access points as
//! fallback), delivers them to a collector over a GT06 binary or HTTP/JSON
//! uplink, buffers what cannot be delivered, sleeps when the asset stops
//! moving, and reports its state on three indicator lamps.

pub mod battery;
pub mod buffer;
pub mod command;
pub mod config;
pub mod delivery;
pub mod error;
pub mod gt06;
pub mod indicator;
pub mod json;
pub mod location;
pub mod power;
pub mod tracker;
