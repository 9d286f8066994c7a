//! Custom error types for the application.
//!
//! This module defines the primary error type, `DaqError`, for the whole crate.
//! Using the `thiserror` crate, it provides a single place to describe every way
//! an acquisition can fail, from a broken configuration file to a spectrometer
//! that dropped off the network.
//!
//! ## Error Hierarchy
//!
//! `DaqError` groups failures by the layer that produced them:
//!
//! - **`Parse`** / **`Serialize`** / **`Io`**: The persisted configuration file could
//!   not be read, decoded or written.
//! - **`UnknownBufferHandler`** / **`Configuration`**: The configuration decoded
//!   but is semantically invalid. Both are fatal at startup.
//! - **`Create`** / **`Setup`**: The session could not allocate a driver handle, or
//!   the connect / set-exposure handshake was refused.
//! - **`StatusDevice`**: A read was attempted (or failed) while the device was not
//!   in a readable state. Carries the offending status code so callers can tell a
//!   disconnect from other failures.
//! - **`Shape`** / **`Validation`**: A frame had the wrong channel width or rank.
//! - **`EmptyBuffer`**: A reduction was requested with no frames buffered. The
//!   signal reader turns this into an absence value rather than surfacing it.
//!
//! By using `#[from]`, `DaqError` can be created from the underlying error types
//! with the `?` operator.

use crate::hardware::DeviceStatusCode;
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

/// Primary error type for the acquisition pipeline.
#[derive(Error, Debug)]
pub enum DaqError {
    /// The persisted configuration does not match the expected schema.
    #[error("Configuration parse error: {0}")]
    Parse(#[from] Box<figment::Error>),

    /// The configuration could not be serialized for persistence.
    #[error("Configuration serialize error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Standard I/O failure while touching the configuration file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The configured buffer handler is not present in the reduction registry.
    #[error("Unknown buffer handler '{name}'. Registered handlers: {known}")]
    UnknownBufferHandler {
        /// Name found in the configuration.
        name: String,
        /// Comma separated list of registered names.
        known: String,
    },

    /// Configuration values parsed but failed semantic validation.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// The driver refused to allocate a handle for the given address.
    #[error("Device create error: {0}")]
    Create(String),

    /// Connect or exposure setup failed, or was attempted out of order.
    #[error("Device setup error: {0}")]
    Setup(String),

    /// The device is not in a state that permits reading.
    #[error("Device status error: status is {status}")]
    StatusDevice {
        /// Status reported when the read was refused or failed.
        status: DeviceStatusCode,
    },

    /// A frame's channel width does not match the buffered frames.
    #[error("Frame shape mismatch: expected {expected} channels, got {actual}")]
    Shape {
        /// Channel count of frames already stored.
        expected: usize,
        /// Channel count of the rejected frame.
        actual: usize,
    },

    /// No frames are buffered.
    #[error("Buffer is empty")]
    EmptyBuffer,

    /// Data handed to a signal or reduction had an unsupported layout.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Unclassified driver failure.
    #[error("Driver error: {0}")]
    Driver(String),
}

impl From<figment::Error> for DaqError {
    fn from(value: figment::Error) -> Self {
        DaqError::Parse(Box::new(value))
    }
}

impl DaqError {
    /// Whether the error leaves the process unable to continue.
    ///
    /// Configuration problems are fatal. Everything else is either recovered
    /// inside the polling loop or reported to the immediate caller.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DaqError::Parse(_)
                | DaqError::Serialize(_)
                | DaqError::Io(_)
                | DaqError::UnknownBufferHandler { .. }
                | DaqError::Configuration(_)
        )
    }

    /// Status code carried by a `StatusDevice` error.
    pub fn status(&self) -> Option<DeviceStatusCode> {
        match self {
            DaqError::StatusDevice { status } => Some(*status),
            _ => None,
        }
    }
}
