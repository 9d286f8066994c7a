//! Log output for the CLI.
//!
//! Everything goes to stderr through `tracing-subscriber`; stdout is reserved
//! for the JSON signal stream. `RUST_LOG` directives win over the configured
//! level, so `RUST_LOG=spectrum_daq::acquisition=trace` works as usual.
//!
//! ```no_run
//! use spectrum_daq::logging::{self, LogConfig, OutputFormat};
//! use tracing::Level;
//!
//! let config = LogConfig::new(Level::DEBUG).with_format(OutputFormat::Json);
//! logging::init(&config).map_err(anyhow::Error::msg)?;
//! tracing::info!(address = "10.116.220.2", "Session starting");
//! # Ok::<(), anyhow::Error>(())
//! ```

use std::str::FromStr;
use tracing::Level;
use tracing_subscriber::{
    filter::LevelFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer,
    Registry,
};

/// Line format on stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Multi-line, human oriented
    Pretty,
    /// One line per event
    Compact,
    /// One JSON object per event
    Json,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(OutputFormat::Pretty),
            "compact" => Ok(OutputFormat::Compact),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!(
                "Invalid log format '{}'. Must be one of: pretty, compact, json",
                s
            )),
        }
    }
}

/// How the CLI logs.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Level used when `RUST_LOG` is unset
    pub level: Level,
    /// Output format
    pub format: OutputFormat,
    /// Include `file:line` of each event
    pub source_location: bool,
    /// ANSI colors (ignored for JSON)
    pub color: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: OutputFormat::Compact,
            source_location: false,
            color: true,
        }
    }
}

impl LogConfig {
    /// Defaults at `level`.
    pub fn new(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    /// Set the output format.
    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    /// Include or omit `file:line`.
    pub fn with_source_location(mut self, enabled: bool) -> Self {
        self.source_location = enabled;
        self
    }

    /// Enable or disable colors.
    pub fn with_color(mut self, enabled: bool) -> Self {
        self.color = enabled;
        self
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::builder()
            .with_default_directive(LevelFilter::from_level(self.level).into())
            .from_env_lossy()
    }

    fn stderr_layer(&self) -> Box<dyn Layer<Registry> + Send + Sync> {
        let filter = self.filter();
        let source = self.source_location;
        match self.format {
            OutputFormat::Pretty => fmt::layer()
                .pretty()
                .with_writer(std::io::stderr)
                .with_file(source)
                .with_line_number(source)
                .with_ansi(self.color)
                .with_filter(filter)
                .boxed(),
            OutputFormat::Compact => fmt::layer()
                .compact()
                .with_writer(std::io::stderr)
                .with_file(source)
                .with_line_number(source)
                .with_ansi(self.color)
                .with_filter(filter)
                .boxed(),
            OutputFormat::Json => fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_file(source)
                .with_line_number(source)
                .with_filter(filter)
                .boxed(),
        }
    }
}

/// Install the global subscriber.
///
/// A no-op if one is already installed.
pub fn init(config: &LogConfig) -> Result<(), String> {
    if tracing::dispatcher::has_been_set() {
        return Ok(());
    }
    tracing_subscriber::registry()
        .with(config.stderr_layer())
        .try_init()
        .map_err(|e| format!("Failed to initialize logging: {}", e))
}
