//! Acquisition configuration using Figment
//!
//! The configuration is a small JSON record persisted next to the process:
//!
//! ```json
//! {"address": "10.116.220.2", "exposure": 2.0, "buffer_size": 1, "buffer_handler": "average"}
//! ```
//!
//! It is loaded from:
//! 1. the JSON file, or built-in defaults when the file does not exist (the
//!    defaults are then written to that path)
//! 2. environment variables prefixed with `SPECTRUM_DAQ_`, e.g.
//!    `SPECTRUM_DAQ_EXPOSURE=0.5`. Overrides are never written back.
//!
//! The buffer handler name is checked against the reduction registry during
//! load, so an unknown name fails before the device is touched.
//!
//! # Example
//! ```no_run
//! use spectrum_daq::config::ExperimentConfig;
//!
//! let config = ExperimentConfig::load("config.json")?;
//! println!("Instrument at {}", config.address);
//! # Ok::<(), spectrum_daq::error::DaqError>(())
//! ```

use figment::{
    providers::{Env, Format, Json, Serialized},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::data::reduction::{BufferHandler, HandlerRegistry, DEFAULT_HANDLER};
use crate::error::{AppResult, DaqError};
use crate::hardware::EthernetConfig;

/// Well-known location of the persisted configuration.
pub const DEFAULT_CONFIG_PATH: &str = "config.json";

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "SPECTRUM_DAQ_";

/// Acquisition parameters for one spectrometer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentConfig {
    /// Instrument network address
    #[serde(alias = "ip")]
    pub address: String,
    /// Exposure time in seconds
    pub exposure: f64,
    /// Number of raw frames retained for reduction
    pub buffer_size: usize,
    /// Name of the reduction applied to the buffer
    pub buffer_handler: String,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            address: "10.116.220.2".to_string(),
            exposure: 2.0,
            buffer_size: 1,
            buffer_handler: DEFAULT_HANDLER.to_string(),
        }
    }
}

impl ExperimentConfig {
    /// Load from `path` against the built-in handler registry.
    ///
    /// Creates and persists the defaults when `path` does not exist.
    pub fn load<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        Self::load_with_registry(path, &HandlerRegistry::builtin())
    }

    /// Load from `path`, validating the handler name against `registry`.
    pub fn load_with_registry<P: AsRef<Path>>(
        path: P,
        registry: &HandlerRegistry,
    ) -> AppResult<Self> {
        let path = path.as_ref();

        let figment = if path.is_file() {
            tracing::debug!(path = %path.display(), "Loading configuration");
            Figment::new().merge(Json::file(path))
        } else {
            let defaults = Self::default();
            defaults.save(path)?;
            tracing::info!(
                path = %path.display(),
                "No configuration found, wrote defaults"
            );
            Figment::from(Serialized::defaults(defaults))
        };

        let config: Self = figment.merge(Env::prefixed(ENV_PREFIX)).extract()?;
        config.validate(registry)?;
        Ok(config)
    }

    /// Write the configuration to `path`, replacing any previous content.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> AppResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let body = serde_json::to_string_pretty(self)?;
        std::fs::write(path, body)?;
        Ok(())
    }

    /// Validate values that parse but make no sense.
    pub fn validate(&self, registry: &HandlerRegistry) -> AppResult<()> {
        if self.address.trim().is_empty() {
            return Err(DaqError::Configuration("address must not be empty".into()));
        }

        if !self.exposure.is_finite() || self.exposure <= 0.0 {
            return Err(DaqError::Configuration(format!(
                "Invalid exposure {}. Must be a positive number of seconds",
                self.exposure
            )));
        }

        if self.buffer_size == 0 {
            return Err(DaqError::Configuration(
                "Invalid buffer_size 0. Must be at least 1".into(),
            ));
        }

        registry.resolve(&self.buffer_handler)?;
        Ok(())
    }

    /// Resolve the configured buffer handler.
    pub fn handler(&self, registry: &HandlerRegistry) -> AppResult<BufferHandler> {
        registry.resolve(&self.buffer_handler)
    }

    /// Network parameters for the driver.
    pub fn ethernet(&self) -> EthernetConfig {
        EthernetConfig::new(self.address.clone())
    }
}
