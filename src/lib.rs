//! # Spectrum DAQ Core Library
//!
//! Device session and acquisition pipeline for a network-attached
//! spectrometer. The crate connects to the instrument, tracks its operational
//! status, issues blocking and buffered reads, and reduces buffered frames into
//! a single signal that a display layer can poll at near real time.
//!
//! ## Crate Structure
//!
//! - **`config`**: `ExperimentConfig`, loaded from JSON with environment
//!   overrides through `figment`. Defaults are persisted on first run.
//! - **`hardware`**: Capability traits the driver implements
//!   (`Connectable`, `ExposureControl`, `SpectrumReadout`) and a simulated
//!   spectrometer for tests and offline runs.
//! - **`session`**: `DeviceSession`, the status state machine around one driver
//!   handle, plus `setup_session`.
//! - **`data`**: The rolling frame buffer and the registry of reduction
//!   strategies (`average`, `sum`, `median`, `max`, `latest`).
//! - **`signal`**: `Signal` and the blocking/non-blocking signal reads.
//! - **`acquisition`**: The polling loop that publishes `SignalUpdate`s.
//! - **`error`**: `DaqError` and the `AppResult` alias.
//! - **`logging`**: `tracing-subscriber` setup.
//!
//! ## Data flow
//!
//! ```text
//! ExperimentConfig -> DeviceSession -> driver read -> BufferStore
//!                                   \-> await_read -----------\
//!                      BufferStore -> BufferHandler reduction -> Signal -> display
//! ```

pub mod acquisition;
pub mod config;
pub mod data;
pub mod error;
pub mod hardware;
pub mod logging;
pub mod session;
pub mod signal;

pub use acquisition::{
    AcquisitionLoop, AcquisitionMode, NoReconnect, ReconnectEvery, ReconnectPolicy,
};
pub use config::ExperimentConfig;
pub use error::{AppResult, DaqError};
pub use session::{setup_session, DeviceSession};
pub use signal::{Signal, SignalUpdate};
