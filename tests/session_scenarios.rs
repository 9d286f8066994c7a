//! End-to-end scenarios for the session and signal pipeline
//!
//! Each test drives the public API the way a display layer would: load the
//! configuration, set up a session against the simulated spectrometer, then
//! read signals.

use ndarray::{array, ArrayD, IxDyn};
use spectrum_daq::config::ExperimentConfig;
use spectrum_daq::data::{BufferStore, HandlerRegistry};
use spectrum_daq::error::DaqError;
use spectrum_daq::hardware::mock::MockSpectrometer;
use spectrum_daq::hardware::DeviceStatusCode;
use spectrum_daq::session::{setup_session, DeviceSession};
use spectrum_daq::signal::{read_signal, Signal};
use std::sync::Arc;
use tempfile::TempDir;

fn instant_mock(channels: usize) -> Arc<MockSpectrometer> {
    Arc::new(MockSpectrometer::new(channels, 1).with_time_scale(0.0))
}

fn config_with(buffer_size: usize) -> ExperimentConfig {
    ExperimentConfig {
        exposure: 0.01,
        buffer_size,
        ..ExperimentConfig::default()
    }
}

async fn ready_session(driver: Arc<MockSpectrometer>, buffer_size: usize) -> Arc<DeviceSession> {
    let session = setup_session(driver, &config_with(buffer_size), &HandlerRegistry::builtin())
        .await
        .unwrap();
    assert!(session.is_ready());
    session
}

// =============================================================================
// Scenario A: first run writes defaults
// =============================================================================

#[test]
fn first_load_creates_default_config() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.json");
    assert!(!path.exists());

    let config = ExperimentConfig::load(&path).unwrap();
    assert_eq!(config.address, "10.116.220.2");
    assert_eq!(config.exposure, 2.0);
    assert_eq!(config.buffer_size, 1);
    assert_eq!(config.buffer_handler, "average");

    let written: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(
        written,
        serde_json::json!({
            "address": "10.116.220.2",
            "exposure": 2.0,
            "buffer_size": 1,
            "buffer_handler": "average"
        })
    );

    // Second load reads the file it just wrote
    assert_eq!(ExperimentConfig::load(&path).unwrap(), config);
}

#[test]
fn unknown_handler_fails_before_device_setup() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(
        &path,
        r#"{"address": "10.116.220.2", "exposure": 1.0, "buffer_size": 3, "buffer_handler": "harmonic"}"#,
    )
    .unwrap();

    let err = ExperimentConfig::load(&path).unwrap_err();
    assert!(err.is_fatal());
    assert!(err.to_string().contains("harmonic"));
}

// =============================================================================
// Scenario B: averaging three frames
// =============================================================================

#[tokio::test]
async fn averaged_signal_from_three_reads() {
    let driver = instant_mock(2);
    for row in [[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]] {
        driver.push_scripted_frame(array![row].into_dyn());
    }
    let session = ready_session(driver, 3).await;

    for _ in 0..3 {
        session.read().await.unwrap();
    }
    assert_eq!(session.status(), DeviceStatusCode::DoneReading);

    let signal = session.read_signal().unwrap().unwrap();
    assert_eq!(signal.values(), vec![3.0, 4.0]);
    assert_eq!(signal.channel_indices(), vec![0, 1]);
    assert_eq!(signal.channel_count(), 2);
}

// =============================================================================
// Scenario C: capacity one keeps only the newest frame
// =============================================================================

#[tokio::test]
async fn capacity_one_keeps_newest_frame() {
    let driver = instant_mock(2);
    driver.push_scripted_frame(array![[1.0, 1.0]].into_dyn());
    driver.push_scripted_frame(array![[9.0, 9.0]].into_dyn());
    let session = ready_session(driver, 1).await;

    session.read().await.unwrap();
    session.read().await.unwrap();

    let buffer = session.buffer();
    assert_eq!(buffer.read().snapshot(), vec![array![[9.0, 9.0]]]);
    assert_eq!(session.read_signal().unwrap().unwrap().values(), vec![9.0, 9.0]);
}

// =============================================================================
// Scenario D: reading while disconnected
// =============================================================================

#[tokio::test]
async fn read_while_disconnected_changes_nothing() {
    let session = ready_session(instant_mock(4), 2).await;
    session.read().await.unwrap();
    session.shutdown().await.unwrap();
    assert!(session.is_disconnected());

    let err = session.read().await.unwrap_err();
    assert!(matches!(
        err,
        DaqError::StatusDevice {
            status: DeviceStatusCode::Disconnected
        }
    ));
    assert_eq!(session.status(), DeviceStatusCode::Disconnected);
    assert_eq!(session.buffer().read().len(), 1);
}

// =============================================================================
// Scenario E: non-blocking read before any acquisition
// =============================================================================

#[tokio::test]
async fn non_blocking_read_before_first_frame_is_absent() {
    let session = ready_session(instant_mock(4), 5).await;
    assert!(session.read_signal().unwrap().is_none());

    let standalone = BufferStore::new(5).unwrap().into_shared();
    let handler = HandlerRegistry::builtin().resolve("median").unwrap();
    assert!(read_signal(&standalone, &handler).unwrap().is_none());
}

// =============================================================================
// Blocking path and validation
// =============================================================================

#[tokio::test]
async fn blocking_read_bypasses_buffer() {
    let driver = instant_mock(32);
    let session = ready_session(driver.clone(), 3).await;

    let signal = session.await_read_signal().await.unwrap();
    assert_eq!(signal.channel_count(), 32);
    assert_eq!(signal.channel_indices().last(), Some(&31));
    assert!(session.buffer().read().is_empty());
    assert_eq!(driver.frame_count(), 1);
}

#[tokio::test]
async fn blocking_read_rejects_wrong_rank() {
    let driver = instant_mock(8);
    let session = ready_session(driver.clone(), 1).await;
    driver.set_malformed_rank(true);

    let err = session.await_read_signal().await.unwrap_err();
    assert!(matches!(err, DaqError::Validation(_)));
    assert!(Signal::new(ArrayD::zeros(IxDyn(&[2, 2, 2]))).is_err());
}

#[tokio::test]
async fn mismatched_frame_width_is_shape_error() {
    let driver = instant_mock(2);
    driver.push_scripted_frame(array![[1.0, 2.0]].into_dyn());
    driver.push_scripted_frame(array![[1.0, 2.0, 3.0]].into_dyn());
    let session = ready_session(driver, 4).await;

    session.read().await.unwrap();
    let err = session.read().await.unwrap_err();
    assert!(matches!(err, DaqError::Shape { .. }));
    assert_eq!(session.buffer().read().len(), 1);
}

#[tokio::test]
async fn exposure_rejection_keeps_previous_value() {
    let session = ready_session(instant_mock(4), 1).await;

    for bad in [0.0, -1.0, f64::NAN] {
        assert!(matches!(
            session.set_exposure(bad).await,
            Err(DaqError::Setup(_))
        ));
        assert_eq!(session.exposure(), Some(0.01));
    }
}

#[tokio::test]
async fn setup_failure_leaves_session_non_ready() {
    let driver = instant_mock(4);
    driver.fail_connect(true);

    let session = setup_session(driver, &config_with(1), &HandlerRegistry::builtin())
        .await
        .unwrap();
    assert!(!session.is_ready());
    assert!(session.is_status(&[DeviceStatusCode::Error]));
    assert!(matches!(
        session.read().await,
        Err(DaqError::StatusDevice { .. })
    ));
}

#[tokio::test]
async fn malformed_address_is_create_error() {
    let config = ExperimentConfig {
        address: "not-an-address".into(),
        ..config_with(1)
    };
    let session = DeviceSession::from_config(instant_mock(4), &config, &HandlerRegistry::builtin())
        .unwrap();

    let err = session.create(&config.ethernet()).await.unwrap_err();
    assert!(matches!(err, DaqError::Create(_)));
    assert_eq!(session.status_code(), None);
    assert!(session.is_disconnected());
}
