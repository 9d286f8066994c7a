//! CLI Entry Point for spectrum-daq
//!
//! Provides command-line interface for:
//! - Running the acquisition loop and streaming signal updates
//! - Taking a single blocking reading
//! - Writing the default configuration
//!
//! Signal output goes to stdout as one JSON object per line; logs go to stderr.
//! The driver is the simulated spectrometer until a hardware adapter is wired in.
//!
//! # Usage
//!
//! Stream buffered updates until Ctrl+C:
//! ```bash
//! spectrum-daq run --mode buffered --interval-ms 40
//! ```
//!
//! One reading:
//! ```bash
//! spectrum-daq --config lab.json read
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use spectrum_daq::acquisition::{
    AcquisitionLoop, AcquisitionMode, ReconnectEvery, DEFAULT_INTERVAL,
};
use spectrum_daq::config::{ExperimentConfig, DEFAULT_CONFIG_PATH};
use spectrum_daq::data::HandlerRegistry;
use spectrum_daq::hardware::mock::{MockSpectrometer, DEFAULT_CHANNELS, DEFAULT_ROWS};
use spectrum_daq::logging::{self, LogConfig, OutputFormat};
use spectrum_daq::session::{setup_session, DeviceSession};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::Level;

#[derive(Parser)]
#[command(name = "spectrum-daq")]
#[command(about = "Spectrometer acquisition with buffered reduction", long_about = None)]
struct Cli {
    /// Configuration file (created with defaults if missing)
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log level when RUST_LOG is unset: trace, debug, info, warn, error
    #[arg(long, global = true, default_value = "info")]
    log_level: Level,

    /// Log format: pretty, compact, json
    #[arg(long, global = true, default_value = "compact")]
    log_format: OutputFormat,

    /// Include file:line in log events
    #[arg(long, global = true)]
    log_source: bool,

    /// Disable colored log output
    #[arg(long, global = true)]
    no_color: bool,

    /// Scale of the simulated readout time (0 = instant)
    #[arg(long, global = true, default_value_t = 1.0)]
    time_scale: f64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll the device and print signal updates as JSON lines
    Run {
        /// buffered or blocking
        #[arg(long, default_value = "buffered")]
        mode: AcquisitionMode,

        /// Tick interval in milliseconds
        #[arg(
            long,
            default_value_t = DEFAULT_INTERVAL.as_millis() as u64,
            value_parser = clap::value_parser!(u64).range(1..)
        )]
        interval_ms: u64,

        /// Stop after this many updates
        #[arg(long)]
        frames: Option<u64>,

        /// Reconnect after a disconnect, at most once per this many milliseconds
        #[arg(long)]
        reconnect_ms: Option<u64>,
    },

    /// Take one blocking reading and print it as JSON
    Read,

    /// Write the default configuration, replacing the existing file
    InitConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = LogConfig::new(cli.log_level)
        .with_format(cli.log_format)
        .with_source_location(cli.log_source)
        .with_color(!cli.no_color);
    logging::init(&log_config).map_err(anyhow::Error::msg)?;

    match cli.command {
        Commands::InitConfig => init_config(&cli.config),
        Commands::Read => {
            let session = open_session(&cli.config, cli.time_scale).await?;
            let result = read_once(&session).await;
            session.shutdown().await?;
            result
        }
        Commands::Run {
            mode,
            interval_ms,
            frames,
            reconnect_ms,
        } => {
            let session = open_session(&cli.config, cli.time_scale).await?;
            let result = run_loop(
                Arc::clone(&session),
                mode,
                Duration::from_millis(interval_ms),
                frames,
                reconnect_ms.map(Duration::from_millis),
            )
            .await;
            session.shutdown().await?;
            result
        }
    }
}

fn init_config(path: &Path) -> Result<()> {
    ExperimentConfig::default()
        .save(path)
        .with_context(|| format!("writing {}", path.display()))?;
    tracing::info!(path = %path.display(), "Default configuration written");
    Ok(())
}

async fn open_session(path: &Path, time_scale: f64) -> Result<Arc<DeviceSession>> {
    let registry = HandlerRegistry::builtin();
    let config = ExperimentConfig::load_with_registry(path, &registry)
        .with_context(|| format!("loading {}", path.display()))?;

    let driver = Arc::new(
        MockSpectrometer::new(DEFAULT_CHANNELS, DEFAULT_ROWS).with_time_scale(time_scale),
    );
    Ok(setup_session(driver, &config, &registry).await?)
}

async fn read_once(session: &DeviceSession) -> Result<()> {
    if !session.is_ready() {
        bail!("device not ready (status {})", session.status());
    }
    let signal = session.await_read_signal().await?;
    println!("{}", serde_json::to_string(&signal.to_update())?);
    Ok(())
}

async fn run_loop(
    session: Arc<DeviceSession>,
    mode: AcquisitionMode,
    interval: Duration,
    frames: Option<u64>,
    reconnect: Option<Duration>,
) -> Result<()> {
    let mut acquisition = AcquisitionLoop::new(session, mode, interval)?;
    if let Some(every) = reconnect {
        acquisition = acquisition.with_reconnect_policy(ReconnectEvery(every));
    }
    let acquisition = Arc::new(acquisition);

    let mut updates = acquisition.subscribe();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(Arc::clone(&acquisition).run(shutdown_rx));

    let mut printed = 0u64;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl+C received, stopping acquisition");
                break;
            }
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let update = updates.borrow_and_update().clone();
                if let Some(update) = update {
                    println!("{}", serde_json::to_string(&update)?);
                    printed += 1;
                    if frames.is_some_and(|limit| printed >= limit) {
                        break;
                    }
                }
            }
        }
    }

    let _ = shutdown_tx.send(true);
    let stats = handle.await.context("acquisition task panicked")?;
    tracing::debug!(?stats, "Final acquisition statistics");
    Ok(())
}
