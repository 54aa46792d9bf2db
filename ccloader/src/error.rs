//! Error types for ccloader.

use std::io;
use thiserror::Error;

/// Result type for ccloader operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for ccloader operations.
///
/// These are transport and setup failures. A session that runs to a
/// protocol-level failure (no chip, verify failed, truncated block) is not an
/// `Error`; it ends with a [`FailureReason`](crate::session::FailureReason).
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Protocol error.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A frame body did not match the layout of its opcode.
    #[error("Invalid frame 0x{opcode:02X}: expected {expected} body bytes, got {actual}")]
    InvalidFrame {
        /// Opcode of the offending frame.
        opcode: u8,
        /// Body length required by the opcode.
        expected: usize,
        /// Body length actually supplied.
        actual: usize,
    },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}
