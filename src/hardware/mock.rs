//! Mock Hardware Implementations
//!
//! Provides a simulated network spectrometer for running the acquisition
//! pipeline without physical hardware. All waiting uses `tokio::time::sleep`,
//! never `std::thread::sleep`.
//!
//! # Behaviour
//!
//! - `create` accepts IPv4/IPv6 literals only
//! - Spectra are a Gaussian peak on a flat baseline plus seeded uniform noise,
//!   scaled by exposure
//! - Readout takes `exposure * time_scale` seconds
//! - Scripted frames, when queued, are returned before generated ones
//! - Faults can be injected: refused handshake, dropped link, malformed rank

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use ndarray::{Array2, ArrayD, IxDyn};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::time::{sleep, Duration};

use crate::hardware::capabilities::{Connectable, ExposureControl, SpectrumReadout};
use crate::hardware::{DeviceStatusCode, DriverReading, EthernetConfig, RawFrame};

/// Default channel count of the simulated detector.
pub const DEFAULT_CHANNELS: usize = 2048;

/// Default number of sub-acquisitions per frame.
pub const DEFAULT_ROWS: usize = 1;

#[derive(Debug)]
struct MockState {
    address: Option<IpAddr>,
    status: DeviceStatusCode,
    exposure_s: Option<f64>,
    scripted: VecDeque<RawFrame>,
    fail_connect: bool,
    offline: bool,
    malformed_rank: bool,
}

/// Simulated network spectrometer.
///
/// # Example
///
/// ```rust,ignore
/// let device = MockSpectrometer::new(512, 1).with_time_scale(0.0);
/// device.create(&EthernetConfig::new("10.116.220.2")).await?;
/// device.connect().await?;
/// device.set_exposure(0.1).await?;
/// let reading = device.read().await?;
/// ```
pub struct MockSpectrometer {
    n_channels: usize,
    n_rows: usize,
    time_scale: f64,
    state: Mutex<MockState>,
    rng: Mutex<StdRng>,
    frame_count: AtomicU64,
}

impl MockSpectrometer {
    /// Create a simulated spectrometer with the given detector geometry.
    pub fn new(n_channels: usize, n_rows: usize) -> Self {
        Self {
            n_channels,
            n_rows,
            time_scale: 1.0,
            state: Mutex::new(MockState {
                address: None,
                status: DeviceStatusCode::Uninitialized,
                exposure_s: None,
                scripted: VecDeque::new(),
                fail_connect: false,
                offline: false,
                malformed_rank: false,
            }),
            rng: Mutex::new(StdRng::seed_from_u64(0x5bec_7a11)),
            frame_count: AtomicU64::new(0),
        }
    }

    /// Scale the simulated readout time. `0.0` makes reads return immediately.
    pub fn with_time_scale(mut self, time_scale: f64) -> Self {
        self.time_scale = time_scale.max(0.0);
        self
    }

    /// Reseed the noise generator.
    pub fn with_seed(self, seed: u64) -> Self {
        *self.rng.lock() = StdRng::seed_from_u64(seed);
        self
    }

    /// Number of channels per row.
    pub fn n_channels(&self) -> usize {
        self.n_channels
    }

    /// Queue a frame to be returned by the next acquisition.
    pub fn push_scripted_frame(&self, frame: RawFrame) {
        self.state.lock().scripted.push_back(frame);
    }

    /// Make subsequent `connect` calls fail.
    pub fn fail_connect(&self, fail: bool) {
        self.state.lock().fail_connect = fail;
    }

    /// Drop the network link. Further reads report `Disconnected`.
    pub fn go_offline(&self) {
        let mut state = self.state.lock();
        state.offline = true;
        state.status = DeviceStatusCode::Disconnected;
    }

    /// Restore the network link. The device still needs a new `connect`.
    pub fn go_online(&self) {
        self.state.lock().offline = false;
    }

    /// Make `await_read` return one-dimensional frames.
    pub fn set_malformed_rank(&self, malformed: bool) {
        self.state.lock().malformed_rank = malformed;
    }

    /// Total frames produced since construction.
    pub fn frame_count(&self) -> u64 {
        self.frame_count.load(Ordering::SeqCst)
    }

    fn readout_delay(&self, exposure_s: f64) -> Duration {
        Duration::from_secs_f64((exposure_s * self.time_scale).max(0.0))
    }

    fn generate_frame(&self, exposure_s: f64) -> RawFrame {
        let center = self.n_channels as f64 / 2.0;
        let width = (self.n_channels as f64 / 20.0).max(1.0);
        let mut rng = self.rng.lock();
        let frame = Array2::from_shape_fn((self.n_rows, self.n_channels), |(_, channel)| {
            let x = (channel as f64 - center) / width;
            let peak = 80.0 * (-0.5 * x * x).exp();
            let noise: f64 = rng.gen_range(-1.0..1.0);
            (5.0 + peak) * exposure_s + noise
        });
        frame.into_dyn()
    }

    /// Begin an acquisition. Returns the exposure to integrate over, or the
    /// status explaining why no acquisition can start.
    fn begin_acquisition(&self) -> std::result::Result<f64, DeviceStatusCode> {
        let mut state = self.state.lock();
        if state.offline {
            state.status = DeviceStatusCode::Disconnected;
            return Err(state.status);
        }
        if !state.status.is_ready() {
            return Err(state.status);
        }
        let Some(exposure_s) = state.exposure_s else {
            return Err(state.status);
        };
        state.status = DeviceStatusCode::Reading;
        Ok(exposure_s)
    }

    /// Finish an acquisition started by `begin_acquisition`.
    fn finish_acquisition(&self, exposure_s: f64) -> std::result::Result<RawFrame, DeviceStatusCode> {
        let scripted = {
            let mut state = self.state.lock();
            if state.offline {
                state.status = DeviceStatusCode::Disconnected;
                return Err(state.status);
            }
            state.status = DeviceStatusCode::DoneReading;
            state.scripted.pop_front()
        };
        let frame = scripted.unwrap_or_else(|| self.generate_frame(exposure_s));
        let count = self.frame_count.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::trace!(frame = count, shape = ?frame.shape(), "MockSpectrometer readout complete");
        Ok(frame)
    }
}

impl Default for MockSpectrometer {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNELS, DEFAULT_ROWS)
    }
}

#[async_trait]
impl Connectable for MockSpectrometer {
    async fn create(&self, config: &EthernetConfig) -> Result<()> {
        let address: IpAddr = config
            .address
            .trim()
            .parse()
            .map_err(|e| anyhow!("MockSpectrometer: invalid address '{}': {}", config.address, e))?;

        let mut state = self.state.lock();
        state.address = Some(address);
        state.status = DeviceStatusCode::Uninitialized;
        tracing::debug!(%address, "MockSpectrometer: handle created");
        Ok(())
    }

    async fn connect(&self) -> Result<()> {
        // Simulated handshake latency
        sleep(Duration::from_millis(1)).await;

        let mut state = self.state.lock();
        let Some(address) = state.address else {
            bail!("MockSpectrometer: connect called before create");
        };
        if state.offline {
            state.status = DeviceStatusCode::Disconnected;
            bail!("MockSpectrometer: {} unreachable", address);
        }
        if state.fail_connect {
            state.status = DeviceStatusCode::Error;
            bail!("MockSpectrometer: handshake with {} refused", address);
        }
        state.status = DeviceStatusCode::Connected;
        tracing::debug!(%address, "MockSpectrometer: connected");
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.status = DeviceStatusCode::Disconnected;
        state.address = None;
        tracing::debug!("MockSpectrometer: disconnected");
        Ok(())
    }

    fn status(&self) -> DeviceStatusCode {
        self.state.lock().status
    }
}

#[async_trait]
impl ExposureControl for MockSpectrometer {
    async fn set_exposure(&self, seconds: f64) -> Result<()> {
        if !seconds.is_finite() || seconds <= 0.0 {
            bail!("MockSpectrometer: exposure must be positive, got {}", seconds);
        }
        let mut state = self.state.lock();
        if !state.status.is_ready() {
            bail!("MockSpectrometer: cannot set exposure while {}", state.status);
        }
        state.exposure_s = Some(seconds);
        Ok(())
    }

    async fn get_exposure(&self) -> Result<f64> {
        self.state
            .lock()
            .exposure_s
            .ok_or_else(|| anyhow!("MockSpectrometer: exposure not set"))
    }
}

#[async_trait]
impl SpectrumReadout for MockSpectrometer {
    async fn read(&self) -> Result<DriverReading> {
        let exposure_s = match self.begin_acquisition() {
            Ok(exposure_s) => exposure_s,
            Err(status) => return Ok(DriverReading::failed(status)),
        };

        sleep(self.readout_delay(exposure_s)).await;

        Ok(match self.finish_acquisition(exposure_s) {
            Ok(frame) => DriverReading::done(frame),
            Err(status) => DriverReading::failed(status),
        })
    }

    async fn await_read(&self) -> Result<RawFrame> {
        let exposure_s = self
            .begin_acquisition()
            .map_err(|status| anyhow!("MockSpectrometer: device not ready ({})", status))?;

        sleep(self.readout_delay(exposure_s)).await;

        let frame = self
            .finish_acquisition(exposure_s)
            .map_err(|status| anyhow!("MockSpectrometer: acquisition aborted ({})", status))?;

        if self.state.lock().malformed_rank {
            let flat: Vec<f64> = frame.iter().copied().collect();
            return Ok(ArrayD::from_shape_vec(IxDyn(&[flat.len()]), flat)?);
        }
        Ok(frame)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
