//! Spectrometer Capabilities
//!
//! Fine-grained capability traits a spectrometer driver implements. The session
//! only ever talks to these traits, so a simulated device, a vendor SDK adapter or
//! a test double can be swapped in without touching the acquisition code:
//!
//! - `Connectable`: handle allocation, network handshake, status reporting
//! - `ExposureControl`: integration time
//! - `SpectrumReadout`: polled and blocking acquisition
//!
//! # Design Philosophy
//!
//! Each capability trait:
//! - Is async (uses #[async_trait])
//! - Is thread-safe (requires Send + Sync)
//! - Uses anyhow::Result for errors
//! - Focuses on ONE thing
//!
//! # Example
//!
//! ```rust,ignore
//! async fn prepare<S>(device: &S, config: &EthernetConfig) -> Result<()>
//! where
//!     S: Connectable + ExposureControl,
//! {
//!     device.create(config).await?;
//!     device.connect().await?;
//!     device.set_exposure(0.5).await?;
//!     Ok(())
//! }
//! ```

use anyhow::Result;
use async_trait::async_trait;

use crate::hardware::{DeviceStatusCode, DriverReading, EthernetConfig, RawFrame};

/// Capability: Connection Lifecycle
///
/// Devices reached over a network link.
///
/// # Contract
/// - `create` allocates a handle for an address but does not touch the network
/// - `connect` performs the handshake; it requires a prior `create`
/// - `status` is a cheap, synchronous query of the driver's last known state
///
/// # Thread Safety
/// - All methods take `&self`
/// - Interior mutability (Mutex/RwLock) should be used for state
#[async_trait]
pub trait Connectable: Send + Sync {
    /// Allocate a handle for the given address.
    ///
    /// # Returns
    /// - Ok(()) if the address was accepted
    /// - Err if the address is malformed or the driver refuses it
    async fn create(&self, config: &EthernetConfig) -> Result<()>;

    /// Open the link to the instrument.
    ///
    /// # Returns
    /// - Ok(()) once the instrument answered
    /// - Err if no handle exists or the handshake failed
    async fn connect(&self) -> Result<()>;

    /// Close the link and release the handle.
    ///
    /// # Default Implementation
    /// Does nothing. Drivers holding sockets should override it.
    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }

    /// Last status reported by the driver.
    fn status(&self) -> DeviceStatusCode;
}

/// Capability: Exposure Time Control
///
/// # Contract
/// - Exposure is in seconds (not milliseconds)
/// - Setting exposure does not start acquisition
/// - Exposure applies to next acquisition
#[async_trait]
pub trait ExposureControl: Send + Sync {
    /// Set exposure/integration time
    ///
    /// # Returns
    /// - Ok(()) if exposure set successfully
    /// - Err if the firmware rejected the value
    async fn set_exposure(&self, seconds: f64) -> Result<()>;

    /// Get current exposure setting in seconds
    async fn get_exposure(&self) -> Result<f64>;
}

/// Capability: Spectrum Readout
///
/// Devices that produce channel-indexed intensity frames.
///
/// # Contract
/// - `read` performs one acquisition and reports the resulting status. A status
///   other than `DoneReading` means the driver produced no frame; `Err` is kept
///   for transport failures.
/// - `await_read` waits for one acquisition and hands the frame back directly.
///   There is no cancellation; timeouts are the driver's responsibility.
/// - Frames are returned unvalidated. Rank checks happen on the caller side.
#[async_trait]
pub trait SpectrumReadout: Send + Sync {
    /// Perform one acquisition and report its status.
    async fn read(&self) -> Result<DriverReading>;

    /// Wait for one acquisition and return the frame.
    async fn await_read(&self) -> Result<RawFrame>;
}

// =============================================================================
// Combined Traits (for trait objects)
// =============================================================================

/// Combined trait for a complete spectrometer driver.
///
/// This trait exists solely to enable trait objects. Implement the individual
/// traits and get this automatically via blanket impl.
///
/// # Usage
/// ```rust,ignore
/// fn use_device(device: Arc<dyn Spectrometer>) { /* ... */ }
/// ```
pub trait Spectrometer: Connectable + ExposureControl + SpectrumReadout {}

/// Blanket implementation - any type implementing all three traits gets Spectrometer for free
impl<T: Connectable + ExposureControl + SpectrumReadout> Spectrometer for T {}
