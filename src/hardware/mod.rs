//! Spectrometer driver abstractions.
//!
//! The byte-level protocol to the instrument lives outside this crate. Everything
//! here is the seam the session talks to: capability traits in [`capabilities`],
//! a simulated device in [`mock`], and the small value types that cross the seam.

pub mod capabilities;
pub mod mock;

use ndarray::{Array2, ArrayD};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One raw acquisition: a row per sub-acquisition, a column per channel.
pub type Frame = Array2<f64>;

/// Frame as handed over by a driver, before its rank has been checked.
pub type RawFrame = ArrayD<f64>;

/// Operational state of a spectrometer.
///
/// Exactly one code holds at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceStatusCode {
    /// Handle allocated (or not), no connection attempted yet.
    Uninitialized,
    /// Connected and idle.
    Connected,
    /// Link to the instrument lost or closed.
    Disconnected,
    /// An acquisition is in flight.
    Reading,
    /// The last acquisition finished; ready for the next one.
    DoneReading,
    /// The instrument or driver reported a failure.
    Error,
}

impl DeviceStatusCode {
    /// States in which exposure may be changed and reads issued.
    pub const READY: [DeviceStatusCode; 2] =
        [DeviceStatusCode::Connected, DeviceStatusCode::DoneReading];

    /// Whether a read or exposure change is allowed in this state.
    pub fn is_ready(self) -> bool {
        Self::READY.contains(&self)
    }
}

impl fmt::Display for DeviceStatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DeviceStatusCode::Uninitialized => "UNINITIALIZED",
            DeviceStatusCode::Connected => "CONNECTED",
            DeviceStatusCode::Disconnected => "DISCONNECTED",
            DeviceStatusCode::Reading => "READING",
            DeviceStatusCode::DoneReading => "DONE_READING",
            DeviceStatusCode::Error => "ERROR",
        };
        write!(f, "{}", label)
    }
}

/// Network parameters handed to the driver on `create`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EthernetConfig {
    /// Instrument address, e.g. `10.116.220.2`.
    pub address: String,
}

impl EthernetConfig {
    /// Build from an address string.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }
}

/// Result of one non-blocking driver acquisition.
///
/// `status` is `DoneReading` and `frame` is present on success. Any other status
/// is the driver reporting why no frame was produced.
#[derive(Debug, Clone)]
pub struct DriverReading {
    /// Status reported by the driver after the acquisition attempt.
    pub status: DeviceStatusCode,
    /// Acquired frame, when the attempt succeeded.
    pub frame: Option<RawFrame>,
}

impl DriverReading {
    /// Successful reading.
    pub fn done(frame: RawFrame) -> Self {
        Self {
            status: DeviceStatusCode::DoneReading,
            frame: Some(frame),
        }
    }

    /// Failed reading with the status the driver reported.
    pub fn failed(status: DeviceStatusCode) -> Self {
        Self {
            status,
            frame: None,
        }
    }
}
