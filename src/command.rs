//! # Operator Commands
//!
//! Commands reach the tracker as events over an `mpsc` channel, whatever the
//! source (SMS gateway, local console). Authorization happens at the source.
//!
//! This module handles:
//! - The [`Command`] event type
//! - Parsing the comma-separated console syntax (`SERVER,GT06,host,port`)

use tokio::sync::oneshot;

use crate::config::ServerProtocol;
use crate::error::{Result, TrackerError};

/// Default geolocation path for `WIFISERVER` without an explicit path
pub const DEFAULT_WIFI_PATH: &str = "/api/locate";

/// Default geolocation port for `WIFISERVER` without an explicit port
pub const DEFAULT_WIFI_PORT: u16 = 80;

/// Accepted `INTERVAL` range in seconds
pub const INTERVAL_RANGE: std::ops::RangeInclusive<u64> = 1..=600;

/// Event delivered to the tracker
///
/// Every command also wakes the tracker if it is sleeping.
#[derive(Debug)]
pub enum Command {
    ApnChanged {
        name: String,
        user: String,
        password: String,
    },
    ServerChanged {
        /// `None` keeps the configured protocol
        protocol: Option<ServerProtocol>,
        host: String,
        port: u16,
    },
    WifiServerChanged {
        host: String,
        port: u16,
        path: String,
    },
    /// New update interval in seconds
    IntervalChanged(u64),
    /// Reply with a text status report
    GetStatus(oneshot::Sender<String>),
    PowerOff,
    Reset,
}

impl Command {
    /// Status request together with the receiver for its reply
    pub fn status() -> (Self, oneshot::Receiver<String>) {
        let (tx, rx) = oneshot::channel();
        (Command::GetStatus(tx), rx)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::ApnChanged { .. } => "apn",
            Command::ServerChanged { .. } => "server",
            Command::WifiServerChanged { .. } => "wifiserver",
            Command::IntervalChanged(_) => "interval",
            Command::GetStatus(_) => "status",
            Command::PowerOff => "poweroff",
            Command::Reset => "reset",
        }
    }
}

/// A parsed console line
#[derive(Debug)]
pub struct ConsoleRequest {
    pub command: Command,
    /// Present for `STATUS`
    pub reply: Option<oneshot::Receiver<String>>,
}

impl From<Command> for ConsoleRequest {
    fn from(command: Command) -> Self {
        Self { command, reply: None }
    }
}

fn invalid(msg: impl Into<String>) -> TrackerError {
    TrackerError::Command(msg.into())
}

fn parse_port(raw: &str) -> Result<u16> {
    match raw.parse::<u16>() {
        Ok(port) if port != 0 => Ok(port),
        _ => Err(invalid(format!("bad port '{}'", raw))),
    }
}

fn parse_protocol(raw: &str) -> Result<ServerProtocol> {
    match raw.to_ascii_uppercase().as_str() {
        "GT06" => Ok(ServerProtocol::Gt06),
        "HTTP" => Ok(ServerProtocol::Http),
        _ => Err(invalid(format!("unknown protocol '{}'", raw))),
    }
}

/// Parse one console line
///
/// The verb is case-insensitive; parameters are comma-separated and keep
/// their case:
///
/// ```text
/// STATUS
/// POWEROFF
/// RESET
/// APN,name[,user[,password]]
/// SERVER,GT06|HTTP,host,port
/// WIFISERVER,host[:port][,path]
/// INTERVAL,seconds
/// ```
///
/// Returns `Ok(None)` for a blank line.
///
/// # Errors
///
/// Returns `TrackerError::Command` for unknown verbs or bad parameters
///
/// # Examples
///
/// ```
/// use asset_tracker::command::{parse_console_line, Command};
///
/// let request = parse_console_line("interval,30")?.unwrap();
/// assert!(matches!(request.command, Command::IntervalChanged(30)));
/// # Ok::<(), asset_tracker::error::TrackerError>(())
/// ```
pub fn parse_console_line(line: &str) -> Result<Option<ConsoleRequest>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let parts: Vec<&str> = line.split(',').map(str::trim).collect();
    let verb = parts[0].to_ascii_uppercase();
    let params = &parts[1..];

    let command = match verb.as_str() {
        "STATUS" => {
            let (command, reply) = Command::status();
            return Ok(Some(ConsoleRequest { command, reply: Some(reply) }));
        }
        "POWEROFF" => Command::PowerOff,
        "RESET" => Command::Reset,
        "APN" => {
            let name = params.first().filter(|name| !name.is_empty());
            let Some(name) = name else {
                return Err(invalid("usage: APN,name[,user[,password]]"));
            };
            Command::ApnChanged {
                name: name.to_string(),
                user: params.get(1).unwrap_or(&"").to_string(),
                password: params.get(2).unwrap_or(&"").to_string(),
            }
        }
        "SERVER" => {
            let [protocol, host, port] = params else {
                return Err(invalid("usage: SERVER,GT06|HTTP,host,port"));
            };
            if host.is_empty() {
                return Err(invalid("server host is empty"));
            }
            Command::ServerChanged {
                protocol: Some(parse_protocol(protocol)?),
                host: host.to_string(),
                port: parse_port(port)?,
            }
        }
        "WIFISERVER" => {
            let Some(host_port) = params.first().filter(|hp| !hp.is_empty()) else {
                return Err(invalid("usage: WIFISERVER,host[:port][,path]"));
            };
            let (host, port) = match host_port.split_once(':') {
                Some((host, port)) => (host, parse_port(port)?),
                None => (*host_port, DEFAULT_WIFI_PORT),
            };
            let path = params.get(1).copied().unwrap_or(DEFAULT_WIFI_PATH);
            Command::WifiServerChanged {
                host: host.to_string(),
                port,
                path: path.to_string(),
            }
        }
        "INTERVAL" => {
            let seconds = params
                .first()
                .and_then(|raw| raw.parse::<u64>().ok())
                .filter(|seconds| INTERVAL_RANGE.contains(seconds))
                .ok_or_else(|| invalid("usage: INTERVAL,seconds (1-600)"))?;
            Command::IntervalChanged(seconds)
        }
        _ => return Err(invalid(format!("unknown command '{}'", parts[0]))),
    };

    Ok(Some(command.into()))
}
