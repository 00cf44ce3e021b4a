//! Public entry points for tower scans and signal strength.
//!
//! A [`TowerScanner`] owns the worker task and the handles shared with it.
//! Scans are requested through a single-slot queue, so at most one scan is
//! ever pending; a second request while one is queued fails with
//! [`ScanError::Busy`].
//!
//! # Cancellation
//!
//! Each scan request carries its own callback, so a request accepted while
//! another scan is running never displaces that scan's callback.
//!
//! [`TowerScanner::cancel_scan`] voids every registered callback, queued or
//! running. A scan already running keeps running, and if the worker has
//! already taken the callback out of its slot, the callback still fires.
//! Callers that time out must therefore tolerate a late delivery.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::modem::Modem;
use crate::stats::ScanStats;
use crate::store::{SharedState, SignalError};
use crate::tower::{SignalSample, TowerSnapshot};
use crate::worker::{CallbackSlot, Command, PendingCallback, Uptime, Worker, WorkerConfig};

/// Cached signal samples older than this are reported as stale by default.
pub const DEFAULT_MAX_SIGNAL_AGE_SECS: u64 = 10;

/// Errors returned by scan requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ScanError {
    #[error("A scan is already pending")]
    Busy,

    #[error("Timed out waiting for scan results")]
    Timeout,

    #[error("Scan worker has stopped")]
    WorkerStopped,
}

/// Configuration for a [`TowerScanner`].
#[derive(Debug, Clone)]
pub struct ScannerConfig {
    /// Worker loop period and per-command timeout.
    pub worker: WorkerConfig,

    /// How often [`TowerScanner::scan_blocking`] checks for results.
    pub blocking_poll: Duration,

    /// Max age used by [`TowerScanner::get_signal`].
    pub max_signal_age_secs: u64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            worker: WorkerConfig::default(),
            blocking_poll: Duration::from_millis(10),
            max_signal_age_secs: DEFAULT_MAX_SIGNAL_AGE_SECS,
        }
    }
}

/// Handle to a running tower scan worker.
pub struct TowerScanner {
    commands: mpsc::Sender<Command>,
    state: Arc<SharedState>,
    callback: Arc<CallbackSlot>,
    stats: Arc<ScanStats>,
    config: ScannerConfig,
    uptime: Uptime,
    worker: JoinHandle<()>,
}

impl TowerScanner {
    /// Start the worker task for `modem`.
    ///
    /// Must be called from within a tokio runtime. The worker runs until
    /// [`shutdown`](Self::shutdown) is called or the scanner is dropped.
    pub fn spawn<M: Modem>(modem: M, config: ScannerConfig) -> Self {
        Self::spawn_with_stats(modem, config, Arc::new(ScanStats::new()))
    }

    /// Start the worker task, recording into an existing stats collector.
    pub fn spawn_with_stats<M: Modem>(modem: M, config: ScannerConfig, stats: Arc<ScanStats>) -> Self {
        let (tx, rx) = mpsc::channel(1);
        let state = Arc::new(SharedState::new());
        let callback = Arc::new(CallbackSlot::new());
        let uptime = Uptime::start();

        let worker = Worker::new(
            Arc::new(modem),
            Arc::clone(&state),
            Arc::clone(&callback),
            Arc::clone(&stats),
            config.worker.clone(),
            uptime,
        );
        let worker = tokio::spawn(worker.run(rx));

        Self {
            commands: tx,
            state,
            callback,
            stats,
            config,
            uptime,
            worker,
        }
    }

    /// Queue a scan without registering a callback.
    ///
    /// This is the low-level request; [`scan_blocking`](Self::scan_blocking)
    /// and [`scan_with_callback`](Self::scan_with_callback) build on it.
    pub fn start_scan(&self) -> Result<(), ScanError> {
        self.request_scan(None)
    }

    fn request_scan(&self, callback: Option<PendingCallback>) -> Result<(), ScanError> {
        match self.commands.try_send(Command::Measure(callback)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.stats.record_busy();
                Err(ScanError::Busy)
            }
            Err(TrySendError::Closed(_)) => Err(ScanError::WorkerStopped),
        }
    }

    /// Queue a scan and call `callback` from the worker task when it completes.
    ///
    /// The callback is only registered if the scan was accepted, and only
    /// receives the snapshot of that scan. It runs on the worker task and
    /// should return quickly.
    pub fn scan_with_callback<F>(&self, callback: F) -> Result<(), ScanError>
    where
        F: FnOnce(TowerSnapshot) + Send + 'static,
    {
        let pending = self.callback.prepare(Box::new(callback));
        self.request_scan(Some(pending))
    }

    /// Keep registered callbacks from being called by a future completion.
    pub fn cancel_scan(&self) {
        self.callback.cancel();
    }

    /// Scan and wait for the result.
    ///
    /// A zero `timeout` waits indefinitely. On timeout the callback is
    /// cancelled and `ScanError::Timeout` is returned; the scan itself may
    /// still complete and update [`get_tower_info`](Self::get_tower_info).
    pub async fn scan_blocking(&self, timeout: Duration) -> Result<TowerSnapshot, ScanError> {
        let result: Arc<Mutex<Option<TowerSnapshot>>> = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&result);

        self.scan_with_callback(move |snapshot| {
            *sink.lock().unwrap_or_else(PoisonError::into_inner) = Some(snapshot);
        })?;

        let started = tokio::time::Instant::now();
        loop {
            if let Some(snapshot) = result.lock().unwrap_or_else(PoisonError::into_inner).take() {
                return Ok(snapshot);
            }
            if !timeout.is_zero() && started.elapsed() >= timeout {
                debug!("Blocking scan timed out after {} ms", timeout.as_millis());
                self.cancel_scan();
                return Err(ScanError::Timeout);
            }
            tokio::time::sleep(self.config.blocking_poll).await;
        }
    }

    /// Last signal sample no older than the configured max age.
    pub fn get_signal(&self) -> Result<SignalSample, SignalError> {
        self.get_signal_with_max_age(self.config.max_signal_age_secs)
    }

    pub fn get_signal_with_max_age(&self, max_age_secs: u64) -> Result<SignalSample, SignalError> {
        self.state.signal_copy(max_age_secs, self.uptime.now_secs())
    }

    /// Uptime second of the last signal sample, 0 if there is none.
    pub fn signal_update(&self) -> u64 {
        self.state.signal_uptime()
    }

    /// Most recently committed tower info. Does not start a scan.
    pub fn get_tower_info(&self) -> TowerSnapshot {
        self.state.snapshot_copy()
    }

    pub fn stats(&self) -> &Arc<ScanStats> {
        &self.stats
    }

    /// Stop the worker and wait for it to exit.
    ///
    /// A scan already queued is run before the worker sees the exit request.
    pub async fn shutdown(self) {
        if self.commands.send(Command::Exit).await.is_err() {
            debug!("Scan worker already stopped");
        }
        if let Err(e) = self.worker.await {
            debug!("Scan worker ended abnormally: {}", e);
        }
        info!("Tower scanner stopped");
    }
}
