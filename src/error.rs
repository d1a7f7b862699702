//! # Error Types
//!
//! Custom error types for the asset tracker using `thiserror`.

use thiserror::Error;

/// Reasons a received GT06 frame is rejected.
///
/// A frame that fails any of these checks is discarded as a whole; callers
/// never see a partially decoded frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame too short: {0} bytes")]
    TooShort(usize),

    #[error("invalid start marker: {0:02X?}")]
    BadStart([u8; 2]),

    #[error("invalid stop marker: {0:02X?}")]
    BadStop([u8; 2]),

    #[error("length field {declared} does not match frame size {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("CRC mismatch: expected 0x{expected:04X}, got 0x{received:04X}")]
    CrcMismatch { expected: u16, received: u16 },

    #[error("{kind} payload too short: {len} bytes")]
    PayloadTooShort { kind: &'static str, len: usize },

    #[error("invalid date/time block")]
    InvalidDateTime,
}

/// Main error type for the asset tracker
#[derive(Debug, Error)]
pub enum TrackerError {
    /// Wire frames that fail framing or checksum validation
    #[error("Malformed frame: {0}")]
    MalformedFrame(#[from] FrameError),

    /// Frames that cannot be built (oversized payload, bad IMEI)
    #[error("GT06 protocol error: {0}")]
    Protocol(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// Configuration could not be written back
    #[error("Configuration write error: {0}")]
    ConfigWrite(#[from] toml::ser::Error),

    /// JSON encode/decode errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Operator commands that cannot be parsed
    #[error("Invalid command: {0}")]
    Command(String),

    /// Uplink failures that are not plain I/O errors
    #[error("Uplink error: {0}")]
    Uplink(String),

    /// An operation exceeded its deadline
    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for the asset tracker
pub type Result<T> = std::result::Result<T, TrackerError>;
