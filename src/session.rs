//! Device session: lifecycle and status of one spectrometer.
//!
//! A `DeviceSession` owns the driver handle, the status state machine, the
//! exposure setting and the frame buffer. It is built once at startup and shared
//! as `Arc<DeviceSession>` with every component that needs the device.
//!
//! ## State machine
//!
//! ```text
//!   (unset) --create--> UNINITIALIZED --connect--> CONNECTED <----------+
//!                              |                     |                  |
//!                              +--connect failed--> ERROR      read()  |
//!                                                    |         v        |
//!   DISCONNECTED --connect--> CONNECTED          READING --> DONE_READING
//!        ^                                           |
//!        +------ driver reported disconnect ---------+---> ERROR
//! ```
//!
//! A failed connect lands in `DISCONNECTED` when the driver reports the device
//! unreachable, so the reconnect policy keeps seeing it as disconnected.
//!
//! Exposure may only be changed, and reads only issued, while the status is
//! `CONNECTED` or `DONE_READING`. At most one driver acquisition is in flight at
//! a time; concurrent callers queue on an internal async mutex.
//!
//! ## Setup
//!
//! [`setup_session`] runs `create -> connect -> set_exposure` from a
//! configuration. Setup failures are logged and leave the session non-ready
//! rather than aborting the process; callers check [`DeviceSession::is_ready`].

use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::config::ExperimentConfig;
use crate::data::{BufferHandler, BufferStore, HandlerRegistry, SharedBuffer};
use crate::error::{AppResult, DaqError};
use crate::hardware::capabilities::Spectrometer;
use crate::hardware::{DeviceStatusCode, EthernetConfig, RawFrame};
use crate::signal::{self, require_frame, Signal};

#[derive(Debug, Default)]
struct SessionState {
    status: Option<DeviceStatusCode>,
    created: bool,
    exposure: Option<f64>,
    target_exposure: Option<f64>,
}

/// Session with one spectrometer.
pub struct DeviceSession {
    driver: Arc<dyn Spectrometer>,
    state: RwLock<SessionState>,
    buffer: SharedBuffer,
    handler: BufferHandler,
    acquisition: Mutex<()>,
}

impl DeviceSession {
    /// Wrap a driver with an empty buffer of `buffer_capacity` frames.
    ///
    /// The status starts unset; call [`create`](Self::create) next.
    pub fn new(
        driver: Arc<dyn Spectrometer>,
        buffer_capacity: usize,
        handler: BufferHandler,
    ) -> AppResult<Self> {
        Ok(Self {
            driver,
            state: RwLock::new(SessionState::default()),
            buffer: BufferStore::new(buffer_capacity)?.into_shared(),
            handler,
            acquisition: Mutex::new(()),
        })
    }

    /// Build a session sized and configured from `config`.
    pub fn from_config(
        driver: Arc<dyn Spectrometer>,
        config: &ExperimentConfig,
        registry: &HandlerRegistry,
    ) -> AppResult<Self> {
        Self::new(driver, config.buffer_size, config.handler(registry)?)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Allocate a driver handle for `config`.
    ///
    /// Status becomes `UNINITIALIZED`. Fails with `Create` if the driver rejects
    /// the address.
    pub async fn create(&self, config: &EthernetConfig) -> AppResult<()> {
        if self.status() == DeviceStatusCode::Reading {
            return Err(DaqError::Create("cannot re-create while reading".into()));
        }
        self.driver
            .create(config)
            .await
            .map_err(|e| DaqError::Create(e.to_string()))?;

        let mut state = self.state.write();
        state.created = true;
        state.status = Some(DeviceStatusCode::Uninitialized);
        tracing::debug!(address = %config.address, "Device handle created");
        Ok(())
    }

    /// Connect to the instrument.
    ///
    /// Allowed from `UNINITIALIZED`, `DISCONNECTED` and `ERROR`. Connecting an
    /// already connected session is a no-op. A failed handshake leaves the
    /// session `DISCONNECTED` when the device is unreachable, `ERROR` otherwise.
    pub async fn connect(&self) -> AppResult<()> {
        let status = {
            let state = self.state.read();
            if !state.created {
                return Err(DaqError::Setup("connect called before create".into()));
            }
            self.current(&state)
        };

        match status {
            DeviceStatusCode::Connected | DeviceStatusCode::DoneReading => {
                tracing::debug!(%status, "Already connected");
                return Ok(());
            }
            DeviceStatusCode::Reading => {
                return Err(DaqError::Setup("cannot connect while reading".into()));
            }
            _ => {}
        }

        match self.driver.connect().await {
            Ok(()) => {
                self.set_status(DeviceStatusCode::Connected);
                tracing::info!("Device connected");
                Ok(())
            }
            Err(e) => {
                let status = self.record_failure();
                tracing::debug!(%status, error = %e, "Connect failed");
                Err(DaqError::Setup(format!("connect failed: {e}")))
            }
        }
    }

    /// Set the exposure time in seconds.
    ///
    /// Fails with `Setup` if `seconds` is not positive, the session is not
    /// `CONNECTED`/`DONE_READING`, or the firmware rejects the value. The stored
    /// exposure is unchanged on failure.
    pub async fn set_exposure(&self, seconds: f64) -> AppResult<()> {
        if !seconds.is_finite() || seconds <= 0.0 {
            return Err(DaqError::Setup(format!(
                "exposure must be positive, got {seconds}"
            )));
        }
        let status = self.status();
        if !status.is_ready() {
            return Err(DaqError::Setup(format!(
                "cannot set exposure while {status}"
            )));
        }

        self.driver
            .set_exposure(seconds)
            .await
            .map_err(|e| DaqError::Setup(format!("exposure rejected: {e}")))?;

        let mut state = self.state.write();
        state.exposure = Some(seconds);
        state.target_exposure = Some(seconds);
        tracing::info!(exposure_s = seconds, "Exposure set");
        Ok(())
    }

    /// Re-run connect and restore the last requested exposure.
    pub async fn reconnect(&self) -> AppResult<()> {
        self.connect().await?;
        let target = self.state.read().target_exposure;
        if let Some(seconds) = target {
            self.set_exposure(seconds).await?;
        }
        Ok(())
    }

    /// Release the driver handle.
    pub async fn shutdown(&self) -> AppResult<()> {
        let _guard = self.acquisition.lock().await;
        let result = self
            .driver
            .disconnect()
            .await
            .map_err(|e| DaqError::Driver(format!("disconnect failed: {e}")));

        let mut state = self.state.write();
        state.status = Some(DeviceStatusCode::Disconnected);
        state.exposure = None;
        tracing::info!("Device session shut down");
        result
    }

    // =========================================================================
    // Acquisition
    // =========================================================================

    /// Perform one driver acquisition and append the frame to the buffer.
    ///
    /// Transitions `READING -> DONE_READING` on success. If the session is not
    /// ready the call fails with `StatusDevice` and nothing changes. If the driver
    /// reports a failure the status becomes `DISCONNECTED` (when that is what the
    /// driver reported) or `ERROR`, and `StatusDevice` carries the driver's code.
    /// A driver claiming success without a frame is reported as `ERROR`.
    pub async fn read(&self) -> AppResult<()> {
        let _guard = self.acquisition.lock().await;
        self.begin_read()?;

        let reading = match self.driver.read().await {
            Ok(reading) => reading,
            Err(e) => {
                let status = self.record_failure();
                tracing::warn!(%status, error = %e, "Driver read failed");
                return Err(DaqError::StatusDevice { status });
            }
        };

        let frame = match (reading.status, reading.frame) {
            (DeviceStatusCode::DoneReading, Some(frame)) => frame,
            (reported, _) => {
                let status = if reported == DeviceStatusCode::Disconnected {
                    DeviceStatusCode::Disconnected
                } else {
                    DeviceStatusCode::Error
                };
                self.set_status(status);
                tracing::debug!(%reported, "Driver reported failed acquisition");
                // A success code without a frame is reported as the classified status
                let code = if reported == DeviceStatusCode::DoneReading {
                    status
                } else {
                    reported
                };
                return Err(DaqError::StatusDevice { status: code });
            }
        };

        self.set_status(DeviceStatusCode::DoneReading);
        let frame = require_frame(frame)?;
        self.buffer.write().push(frame)
    }

    /// Wait for one acquisition and return it, bypassing the buffer.
    ///
    /// Driver failures propagate as `Driver` errors after the status has been
    /// updated, so [`is_disconnected`](Self::is_disconnected) reflects them.
    pub async fn await_read(&self) -> AppResult<RawFrame> {
        let _guard = self.acquisition.lock().await;
        self.begin_read()?;

        match self.driver.await_read().await {
            Ok(frame) => {
                self.set_status(DeviceStatusCode::DoneReading);
                Ok(frame)
            }
            Err(e) => {
                let status = self.record_failure();
                tracing::warn!(%status, error = %e, "Blocking read failed");
                Err(DaqError::Driver(e.to_string()))
            }
        }
    }

    /// Blocking read wrapped as a signal.
    pub async fn await_read_signal(&self) -> AppResult<Signal> {
        signal::await_read_signal(self).await
    }

    /// Non-blocking reduction of the buffer with the configured handler.
    pub fn read_signal(&self) -> AppResult<Option<Signal>> {
        signal::read_signal(&self.buffer, &self.handler)
    }

    fn begin_read(&self) -> AppResult<()> {
        let mut state = self.state.write();
        let status = self.current(&state);
        if !status.is_ready() || state.exposure.is_none() {
            return Err(DaqError::StatusDevice { status });
        }
        state.status = Some(DeviceStatusCode::Reading);
        Ok(())
    }

    /// Classify a driver failure from the driver's own status.
    fn record_failure(&self) -> DeviceStatusCode {
        let status = if self.driver.status() == DeviceStatusCode::Disconnected {
            DeviceStatusCode::Disconnected
        } else {
            DeviceStatusCode::Error
        };
        self.set_status(status);
        status
    }

    // =========================================================================
    // Queries
    // =========================================================================

    fn current(&self, state: &SessionState) -> DeviceStatusCode {
        state.status.unwrap_or(DeviceStatusCode::Uninitialized)
    }

    fn set_status(&self, status: DeviceStatusCode) {
        self.state.write().status = Some(status);
    }

    /// Current status. An unset status reads as `UNINITIALIZED`.
    pub fn status(&self) -> DeviceStatusCode {
        self.current(&self.state.read())
    }

    /// Current status, `None` before `create`.
    pub fn status_code(&self) -> Option<DeviceStatusCode> {
        self.state.read().status
    }

    /// Whether the current status is one of `codes`.
    pub fn is_status(&self, codes: &[DeviceStatusCode]) -> bool {
        self.state
            .read()
            .status
            .is_some_and(|status| codes.contains(&status))
    }

    /// Whether the status is unset or `DISCONNECTED`.
    pub fn is_disconnected(&self) -> bool {
        matches!(
            self.state.read().status,
            None | Some(DeviceStatusCode::Disconnected)
        )
    }

    /// Whether a read can be issued: exposure set and status
    /// `CONNECTED`/`DONE_READING`.
    pub fn is_ready(&self) -> bool {
        let state = self.state.read();
        state.exposure.is_some() && state.status.is_some_and(DeviceStatusCode::is_ready)
    }

    /// Exposure accepted by the device, in seconds.
    pub fn exposure(&self) -> Option<f64> {
        self.state.read().exposure
    }

    /// Shared handle to the frame buffer.
    pub fn buffer(&self) -> SharedBuffer {
        Arc::clone(&self.buffer)
    }

    /// Configured buffer handler.
    pub fn handler(&self) -> &BufferHandler {
        &self.handler
    }
}

/// Build a session from `config` and run `create -> connect -> set_exposure`.
///
/// Configuration problems (unknown handler, zero buffer) are returned as errors.
/// Device setup problems are logged and the session is returned non-ready.
pub async fn setup_session(
    driver: Arc<dyn Spectrometer>,
    config: &ExperimentConfig,
    registry: &HandlerRegistry,
) -> AppResult<Arc<DeviceSession>> {
    let session = Arc::new(DeviceSession::from_config(driver, config, registry)?);

    let result = async {
        session.create(&config.ethernet()).await?;
        session.connect().await?;
        session.set_exposure(config.exposure).await
    }
    .await;

    match result {
        Ok(()) => tracing::info!(
            address = %config.address,
            exposure_s = config.exposure,
            buffer_size = config.buffer_size,
            handler = %config.buffer_handler,
            "Device ready"
        ),
        // TODO: retry initial setup with backoff once a reconnect policy is chosen per deployment
        Err(e) => tracing::error!(
            address = %config.address,
            status = %session.status(),
            error = %e,
            "Device setup failed, continuing with a non-ready session"
        ),
    }

    Ok(session)
}
