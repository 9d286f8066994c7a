//! Polling loop that drives a session and publishes signal updates.
//!
//! The display layer never talks to the device. It subscribes to a
//! `watch::Receiver<Option<SignalUpdate>>` and renders whatever is current;
//! `None` means nothing has been acquired yet.
//!
//! Two mutually exclusive modes:
//!
//! - **Buffered**: an acquisition tick calls [`DeviceSession::read`] to append
//!   frames, and an independent reduction tick reduces the buffer and publishes
//!   the result. Both run concurrently at the configured interval against the
//!   same buffer.
//! - **Blocking**: each tick performs one blocking acquisition and publishes it.
//!
//! Per-tick failures never leave the loop. Status errors are counted, the
//! session is checked for disconnection, and the [`ReconnectPolicy`] decides
//! whether to reconnect. The default policy never does.

use parking_lot::Mutex;
use serde::Serialize;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::error::{AppResult, DaqError};
use crate::session::DeviceSession;
use crate::signal::{Signal, SignalUpdate};

/// Default tick interval: 25 reads per second.
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(40);

/// Which acquisition path drives the display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AcquisitionMode {
    /// Polled reads into the buffer, reduced on a separate tick.
    Buffered,
    /// One blocking acquisition per tick, no buffering.
    Blocking,
}

impl FromStr for AcquisitionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "buffered" => Ok(AcquisitionMode::Buffered),
            "blocking" => Ok(AcquisitionMode::Blocking),
            _ => Err(format!(
                "Invalid acquisition mode '{}'. Must be one of: buffered, blocking",
                s
            )),
        }
    }
}

// =============================================================================
// Reconnection
// =============================================================================

/// Decides whether to attempt a reconnect after a disconnect was detected.
pub trait ReconnectPolicy: Send + Sync {
    /// `attempts` counts previous attempts since the last successful read;
    /// `since_last` is the time since the previous attempt, if any.
    fn should_reconnect(&self, attempts: u32, since_last: Option<Duration>) -> bool;
}

/// Never reconnect; only report the disconnect.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoReconnect;

impl ReconnectPolicy for NoReconnect {
    fn should_reconnect(&self, _attempts: u32, _since_last: Option<Duration>) -> bool {
        false
    }
}

/// Reconnect at most once per interval.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectEvery(pub Duration);

impl ReconnectPolicy for ReconnectEvery {
    fn should_reconnect(&self, _attempts: u32, since_last: Option<Duration>) -> bool {
        since_last.map_or(true, |elapsed| elapsed >= self.0)
    }
}

#[derive(Debug, Default)]
struct ReconnectState {
    attempts: u32,
    last_attempt: Option<Instant>,
}

// =============================================================================
// Statistics
// =============================================================================

/// Counters maintained by the loop.
#[derive(Debug, Default)]
pub struct AcquisitionStats {
    reads: AtomicU64,
    status_errors: AtomicU64,
    other_errors: AtomicU64,
    updates: AtomicU64,
    empty_polls: AtomicU64,
    reconnect_attempts: AtomicU64,
}

/// Point-in-time copy of [`AcquisitionStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct AcquisitionSnapshot {
    /// Successful driver acquisitions
    pub reads: u64,
    /// Reads refused or failed with a status error
    pub status_errors: u64,
    /// Other per-tick failures (shape, validation, setup)
    pub other_errors: u64,
    /// Signal updates published
    pub updates: u64,
    /// Reduction ticks that found nothing new
    pub empty_polls: u64,
    /// Reconnects attempted
    pub reconnect_attempts: u64,
}

impl AcquisitionStats {
    /// Copy the current counters.
    pub fn snapshot(&self) -> AcquisitionSnapshot {
        AcquisitionSnapshot {
            reads: self.reads.load(Ordering::Relaxed),
            status_errors: self.status_errors.load(Ordering::Relaxed),
            other_errors: self.other_errors.load(Ordering::Relaxed),
            updates: self.updates.load(Ordering::Relaxed),
            empty_polls: self.empty_polls.load(Ordering::Relaxed),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// AcquisitionLoop
// =============================================================================

/// Drives one session at a fixed interval and publishes signal updates.
pub struct AcquisitionLoop {
    session: Arc<DeviceSession>,
    mode: AcquisitionMode,
    interval: Duration,
    reconnect: Box<dyn ReconnectPolicy>,
    reconnect_state: Mutex<ReconnectState>,
    stats: AcquisitionStats,
    last_reduced: AtomicU64,
    updates: watch::Sender<Option<SignalUpdate>>,
}

impl AcquisitionLoop {
    /// Create a loop for `session` with the [`NoReconnect`] policy.
    ///
    /// Fails with `Configuration` if `interval` is zero.
    pub fn new(
        session: Arc<DeviceSession>,
        mode: AcquisitionMode,
        interval: Duration,
    ) -> AppResult<Self> {
        if interval.is_zero() {
            return Err(DaqError::Configuration(
                "acquisition interval must be non-zero".into(),
            ));
        }
        let (updates, _) = watch::channel(None);
        Ok(Self {
            session,
            mode,
            interval,
            reconnect: Box::new(NoReconnect),
            reconnect_state: Mutex::new(ReconnectState::default()),
            stats: AcquisitionStats::default(),
            last_reduced: AtomicU64::new(0),
            updates,
        })
    }

    /// Replace the reconnect policy.
    pub fn with_reconnect_policy(mut self, policy: impl ReconnectPolicy + 'static) -> Self {
        self.reconnect = Box::new(policy);
        self
    }

    /// Receiver for signal updates. `None` until the first update.
    pub fn subscribe(&self) -> watch::Receiver<Option<SignalUpdate>> {
        self.updates.subscribe()
    }

    /// Current counters.
    pub fn stats(&self) -> AcquisitionSnapshot {
        self.stats.snapshot()
    }

    /// Configured mode.
    pub fn mode(&self) -> AcquisitionMode {
        self.mode
    }

    /// One acquisition tick: read a frame into the buffer.
    ///
    /// Returns whether a frame was acquired. Failures are absorbed.
    pub async fn acquisition_tick(&self) -> bool {
        match self.session.read().await {
            Ok(()) => {
                self.stats.reads.fetch_add(1, Ordering::Relaxed);
                self.reconnect_state.lock().attempts = 0;
                true
            }
            Err(e) => {
                self.absorb(&e).await;
                false
            }
        }
    }

    /// One reduction tick: reduce the buffer and publish if it changed.
    ///
    /// Returns the published update, or `None` for "no update this tick".
    pub fn reduction_tick(&self) -> Option<SignalUpdate> {
        let seen = self.last_reduced.load(Ordering::Acquire);
        let fresh = self
            .session
            .buffer()
            .read()
            .reduce_if_newer(seen, self.session.handler())
            .and_then(|fresh| {
                fresh
                    .map(|(pushed, frame)| Signal::from_frame(frame).map(|signal| (pushed, signal)))
                    .transpose()
            });

        match fresh {
            Ok(Some((pushed, signal))) => {
                self.last_reduced.store(pushed, Ordering::Release);
                Some(self.publish(&signal))
            }
            Ok(None) => {
                self.stats.empty_polls.fetch_add(1, Ordering::Relaxed);
                None
            }
            Err(e) => {
                self.stats.other_errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(error = %e, "Buffer reduction failed");
                None
            }
        }
    }

    /// One blocking tick: acquire, wrap and publish a single frame.
    pub async fn blocking_tick(&self) -> Option<SignalUpdate> {
        match self.session.await_read_signal().await {
            Ok(signal) => {
                self.stats.reads.fetch_add(1, Ordering::Relaxed);
                self.reconnect_state.lock().attempts = 0;
                Some(self.publish(&signal))
            }
            Err(e) => {
                self.absorb(&e).await;
                None
            }
        }
    }

    fn publish(&self, signal: &Signal) -> SignalUpdate {
        let update = signal.to_update();
        self.updates.send_replace(Some(update.clone()));
        self.stats.updates.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(channels = update.channel_count, "Signal update published");
        update
    }

    /// Count a per-tick failure and run the disconnect check.
    async fn absorb(&self, error: &DaqError) {
        match error {
            DaqError::StatusDevice { status } => {
                self.stats.status_errors.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(%status, "Read skipped");
            }
            other => {
                self.stats.other_errors.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(error = %other, "Read failed");
            }
        }

        if self.session.is_disconnected() {
            self.on_disconnect().await;
        }
    }

    async fn on_disconnect(&self) {
        let decision = {
            let mut state = self.reconnect_state.lock();
            let since_last = state.last_attempt.map(|t| t.elapsed());
            if self.reconnect.should_reconnect(state.attempts, since_last) {
                state.attempts += 1;
                state.last_attempt = Some(Instant::now());
                Some(state.attempts)
            } else {
                None
            }
        };

        let Some(attempt) = decision else {
            tracing::debug!("Device disconnected, reconnect not attempted");
            return;
        };

        self.stats.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
        match self.session.reconnect().await {
            Ok(()) => tracing::info!(attempt, "Device reconnected"),
            Err(e) => tracing::warn!(attempt, error = %e, "Reconnect failed"),
        }
    }

    /// Run until `shutdown` turns `true` (or its sender is dropped).
    pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> AcquisitionSnapshot {
        tracing::info!(
            mode = ?self.mode,
            interval_ms = self.interval.as_millis() as u64,
            "Acquisition loop started"
        );

        match self.mode {
            AcquisitionMode::Buffered => {
                tokio::join!(
                    self.acquisition_task(shutdown.clone()),
                    self.reduction_task(shutdown)
                );
            }
            AcquisitionMode::Blocking => self.blocking_task(shutdown).await,
        }

        let stats = self.stats();
        tracing::info!(
            reads = stats.reads,
            updates = stats.updates,
            status_errors = stats.status_errors,
            other_errors = stats.other_errors,
            reconnect_attempts = stats.reconnect_attempts,
            "Acquisition loop stopped"
        );
        stats
    }

    fn ticker(&self) -> tokio::time::Interval {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker
    }

    async fn acquisition_task(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = self.ticker();
        loop {
            tokio::select! {
                _ = shutdown_requested(&mut shutdown) => break,
                _ = ticker.tick() => {}
            }
            self.acquisition_tick().await;
        }
    }

    async fn reduction_task(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = self.ticker();
        loop {
            tokio::select! {
                _ = shutdown_requested(&mut shutdown) => break,
                _ = ticker.tick() => {}
            }
            self.reduction_tick();
        }
    }

    async fn blocking_task(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = self.ticker();
        loop {
            tokio::select! {
                _ = shutdown_requested(&mut shutdown) => break,
                _ = ticker.tick() => {}
            }
            self.blocking_tick().await;
        }
    }
}

/// Resolves once the flag is `true` or the sender is gone.
async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::HandlerRegistry;
    use crate::hardware::mock::MockSpectrometer;
    use crate::hardware::{DeviceStatusCode, EthernetConfig};
    use ndarray::array;
    use tracing_test::traced_test;

    async fn ready(driver: Arc<MockSpectrometer>, capacity: usize) -> Arc<DeviceSession> {
        let handler = HandlerRegistry::builtin().resolve("average").unwrap();
        let session = DeviceSession::new(driver, capacity, handler).unwrap();
        session
            .create(&EthernetConfig::new("10.116.220.2"))
            .await
            .unwrap();
        session.connect().await.unwrap();
        session.set_exposure(0.05).await.unwrap();
        Arc::new(session)
    }

    fn mock(channels: usize) -> Arc<MockSpectrometer> {
        Arc::new(MockSpectrometer::new(channels, 1).with_time_scale(0.0))
    }

    #[test]
    fn mode_parses_case_insensitively() {
        assert_eq!(
            "Buffered".parse::<AcquisitionMode>(),
            Ok(AcquisitionMode::Buffered)
        );
        assert_eq!(
            "blocking".parse::<AcquisitionMode>(),
            Ok(AcquisitionMode::Blocking)
        );
        assert!("stream".parse::<AcquisitionMode>().is_err());
    }

    #[test]
    fn reconnect_every_waits_for_interval() {
        let policy = ReconnectEvery(Duration::from_secs(1));
        assert!(policy.should_reconnect(0, None));
        assert!(!policy.should_reconnect(1, Some(Duration::from_millis(10))));
        assert!(policy.should_reconnect(1, Some(Duration::from_secs(2))));
        assert!(!NoReconnect.should_reconnect(0, None));
    }

    #[tokio::test]
    async fn zero_interval_is_rejected() {
        let session = ready(mock(4), 1).await;
        let result = AcquisitionLoop::new(session, AcquisitionMode::Buffered, Duration::ZERO);
        assert!(matches!(result, Err(DaqError::Configuration(_))));
    }

    #[tokio::test]
    async fn missing_exposure_counts_as_status_error() {
        let handler = HandlerRegistry::builtin().resolve("average").unwrap();
        let session = DeviceSession::new(mock(4), 1, handler).unwrap();
        session
            .create(&EthernetConfig::new("10.116.220.2"))
            .await
            .unwrap();
        session.connect().await.unwrap();
        let acq = AcquisitionLoop::new(
            Arc::new(session),
            AcquisitionMode::Buffered,
            DEFAULT_INTERVAL,
        )
        .unwrap();

        assert!(!acq.acquisition_tick().await);
        let stats = acq.stats();
        assert_eq!(stats.status_errors, 1);
        assert_eq!(stats.other_errors, 0);
    }

    #[tokio::test]
    async fn each_push_is_published_once() {
        let driver = mock(2);
        driver.push_scripted_frame(array![[2.0, 2.0]].into_dyn());
        driver.push_scripted_frame(array![[4.0, 4.0]].into_dyn());
        let session = ready(driver, 2).await;
        let acq = AcquisitionLoop::new(session, AcquisitionMode::Buffered, DEFAULT_INTERVAL)
            .unwrap();

        assert!(acq.acquisition_tick().await);
        assert_eq!(acq.reduction_tick().unwrap().values, vec![2.0, 2.0]);
        assert!(acq.acquisition_tick().await);
        assert_eq!(acq.reduction_tick().unwrap().values, vec![3.0, 3.0]);
        assert!(acq.reduction_tick().is_none());
        assert_eq!(acq.stats().updates, 2);
    }

    #[tokio::test]
    async fn reduction_tick_on_empty_buffer_is_no_update() {
        let session = ready(mock(8), 3).await;
        let acq = AcquisitionLoop::new(session, AcquisitionMode::Buffered, DEFAULT_INTERVAL)
            .unwrap();

        assert!(acq.reduction_tick().is_none());
        assert!(acq.subscribe().borrow().is_none());
        assert_eq!(acq.stats().empty_polls, 1);
    }

    #[tokio::test]
    async fn buffered_ticks_publish_reduced_signal() {
        let driver = mock(2);
        for values in [[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]] {
            driver.push_scripted_frame(array![values].into_dyn());
        }
        let session = ready(driver, 3).await;
        let acq = AcquisitionLoop::new(session, AcquisitionMode::Buffered, DEFAULT_INTERVAL)
            .unwrap();
        let rx = acq.subscribe();

        for _ in 0..3 {
            assert!(acq.acquisition_tick().await);
        }
        let update = acq.reduction_tick().unwrap();
        assert_eq!(update.values, vec![3.0, 4.0]);
        assert_eq!(update.channel_indices, vec![0, 1]);
        assert_eq!(rx.borrow().as_ref(), Some(&update));

        // Nothing new since the last reduction
        assert!(acq.reduction_tick().is_none());
        assert_eq!(acq.stats().updates, 1);
    }

    #[tokio::test]
    #[traced_test]
    async fn disconnect_is_absorbed_without_reconnect() {
        let driver = mock(4);
        let session = ready(driver.clone(), 1).await;
        let acq = AcquisitionLoop::new(session.clone(), AcquisitionMode::Buffered, DEFAULT_INTERVAL)
            .unwrap();

        driver.go_offline();
        assert!(!acq.acquisition_tick().await);
        assert!(!acq.acquisition_tick().await);

        let stats = acq.stats();
        assert_eq!(stats.status_errors, 2);
        assert_eq!(stats.reconnect_attempts, 0);
        assert_eq!(session.status(), DeviceStatusCode::Disconnected);
        assert!(logs_contain("reconnect not attempted"));
    }

    #[tokio::test]
    async fn reconnect_policy_restores_session() {
        let driver = mock(4);
        let session = ready(driver.clone(), 1).await;
        let acq =
            AcquisitionLoop::new(session.clone(), AcquisitionMode::Buffered, DEFAULT_INTERVAL)
                .unwrap()
                .with_reconnect_policy(ReconnectEvery(Duration::ZERO));

        driver.go_offline();
        assert!(!acq.acquisition_tick().await);
        assert_eq!(acq.stats().reconnect_attempts, 1);
        assert!(session.is_disconnected());

        driver.go_online();
        assert!(!acq.acquisition_tick().await);
        assert_eq!(acq.stats().reconnect_attempts, 2);
        assert!(session.is_ready());

        assert!(acq.acquisition_tick().await);
    }

    #[tokio::test]
    async fn blocking_tick_bypasses_buffer() {
        let session = ready(mock(16), 2).await;
        let acq = AcquisitionLoop::new(session.clone(), AcquisitionMode::Blocking, DEFAULT_INTERVAL)
            .unwrap();

        let update = acq.blocking_tick().await.unwrap();
        assert_eq!(update.channel_count, 16);
        assert!(session.buffer().read().is_empty());
    }

    #[tokio::test]
    async fn blocking_tick_absorbs_rank_errors() {
        let driver = mock(4);
        let session = ready(driver.clone(), 1).await;
        driver.set_malformed_rank(true);
        let acq = AcquisitionLoop::new(session, AcquisitionMode::Blocking, DEFAULT_INTERVAL)
            .unwrap();

        assert!(acq.blocking_tick().await.is_none());
        assert_eq!(acq.stats().other_errors, 1);
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let session = ready(mock(8), 2).await;
        let acq = Arc::new(
            AcquisitionLoop::new(session, AcquisitionMode::Buffered, Duration::from_millis(5))
                .unwrap(),
        );
        let mut rx = acq.subscribe();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(Arc::clone(&acq).run(shutdown_rx));
        tokio::time::timeout(Duration::from_secs(2), rx.changed())
            .await
            .unwrap()
            .unwrap();
        shutdown_tx.send(true).unwrap();

        let stats = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(stats.reads >= 1);
        assert!(stats.updates >= 1);
    }
}
