//! # Error Types
//!
//! Custom error types for the Kobuki driver using `thiserror`.

use thiserror::Error;

use crate::driver::ConnectionState;

/// Main error type for the Kobuki driver
#[derive(Debug, Error)]
pub enum KobukiError {
    /// Wire protocol errors (malformed frames, bad sub-packet layouts)
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serial channel failures (open, read, write)
    #[error("Serial error: {0}")]
    Serial(String),

    /// None of the candidate device paths could be opened
    #[error("No Kobuki device found (tried: {0})")]
    SerialPortNotFound(String),

    /// Command issued while the connection is not running
    #[error("Not connected: command rejected")]
    NotConnected,

    /// Lifecycle operation requested from the wrong state
    #[error("Invalid state for {operation}: {state:?}")]
    InvalidState {
        operation: &'static str,
        state: ConnectionState,
    },

    /// Telemetry record serialization errors
    #[error("Telemetry error: {0}")]
    Telemetry(#[from] serde_json::Error),
}

/// Result type alias for the Kobuki driver
pub type Result<T> = std::result::Result<T, KobukiError>;
