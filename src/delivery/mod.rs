//! # Delivery Module
//!
//! Gets records to the collector over the configured uplink.
//!
//! This module handles:
//! - Connecting (GT06 login, or nothing for HTTP) and transparent reconnects
//! - Sending one record and classifying the outcome
//! - Reflecting link state and traffic on the link lamp
//!
//! The manager is owned by the sampling loop and is never shared, so no lock
//! guards the connection, its state or the GT06 serial counter.

pub mod gt06;
pub mod http;
pub mod link;

use std::fmt;
use std::time::Duration;

use crate::config::{ServerConfig, ServerProtocol};
use crate::error::Result;
use crate::indicator::{Lamp, LampMode, StatusIndicator};
use crate::location::LocationRecord;

pub use self::gt06::Gt06Uplink;
pub use self::http::HttpUplink;
use self::link::TcpDialer;

/// Uplink connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    /// GT06 session established
    LoggedIn,
    /// HTTP uplink ready
    Connected,
}

impl ConnectionState {
    pub fn is_up(self) -> bool {
        matches!(self, ConnectionState::LoggedIn | ConnectionState::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::LoggedIn => "Logged in",
            ConnectionState::Connected => "Connected",
        };
        f.write_str(name)
    }
}

/// Outcome of one send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    Failed,
}

/// Uplink variant, chosen once from configuration
pub enum Uplink {
    Gt06(Gt06Uplink),
    Http(HttpUplink),
}

impl Uplink {
    fn state(&self) -> ConnectionState {
        match self {
            Uplink::Gt06(u) => u.state(),
            Uplink::Http(u) => u.state(),
        }
    }
}

/// Connection management and lamp feedback around an [`Uplink`]
pub struct DeliveryManager {
    uplink: Uplink,
    indicator: StatusIndicator,
}

impl DeliveryManager {
    pub fn new(uplink: Uplink, indicator: StatusIndicator) -> Self {
        Self { uplink, indicator }
    }

    /// Build the uplink named by the server configuration
    ///
    /// Returns `None` when no server is configured.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn from_config(
        server: &ServerConfig,
        imei: &str,
        indicator: StatusIndicator,
    ) -> Result<Option<Self>> {
        if !server.is_configured() {
            return Ok(None);
        }

        let uplink = match server.protocol {
            ServerProtocol::Gt06 => Uplink::Gt06(Gt06Uplink::new(
                Box::new(TcpDialer),
                server.host.clone(),
                server.port,
                imei,
                Duration::from_secs(server.connect_timeout_s),
                Duration::from_secs(server.ack_timeout_s),
            )),
            ServerProtocol::Http => Uplink::Http(HttpUplink::new(
                server.http_url(),
                imei,
                Duration::from_secs(server.connect_timeout_s),
            )?),
        };

        Ok(Some(Self::new(uplink, indicator)))
    }

    pub fn protocol(&self) -> ServerProtocol {
        match self.uplink {
            Uplink::Gt06(_) => ServerProtocol::Gt06,
            Uplink::Http(_) => ServerProtocol::Http,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.uplink.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_up()
    }

    /// Whether the uplink can carry WiFi records without a position
    pub fn accepts_unresolved_wifi(&self) -> bool {
        matches!(self.uplink, Uplink::Gt06(_))
    }

    pub async fn connect(&mut self) -> bool {
        self.indicator.set_mode(Lamp::Link, LampMode::BlinkConnecting);

        let connected = match &mut self.uplink {
            Uplink::Gt06(u) => u.connect().await,
            Uplink::Http(u) => u.connect(),
        };

        self.show_link_state();
        connected
    }

    /// Send one record, reconnecting first if needed
    pub async fn send(&mut self, record: &LocationRecord) -> Delivery {
        if !self.is_connected() {
            self.indicator.set_mode(Lamp::Link, LampMode::BlinkConnecting);
        }

        self.indicator.pulse_start(Lamp::Link);
        let result = match &mut self.uplink {
            Uplink::Gt06(u) => u.send(record).await,
            Uplink::Http(u) => u.send(record).await,
        };
        self.indicator.pulse_stop(Lamp::Link);

        self.show_link_state();
        result
    }

    pub fn disconnect(&mut self) {
        match &mut self.uplink {
            Uplink::Gt06(u) => u.disconnect(),
            Uplink::Http(u) => u.disconnect(),
        }
        self.show_link_state();
    }

    fn show_link_state(&self) {
        let mode = if self.is_connected() { LampMode::On } else { LampMode::Off };
        self.indicator.set_mode(Lamp::Link, mode);
    }
}
