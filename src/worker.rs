//! The scan worker task.
//!
//! One tokio task owns all modem I/O. It waits on a single-slot command queue
//! with a short timeout, samples the signal strength on every wake, and runs
//! the two QENG queries when a scan is requested. Completed snapshots are
//! committed to [`SharedState`] and handed to the callback that came with the
//! scan request.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, timeout};
use tracing::{debug, info, warn};

use crate::modem::{CompletionStatus, Modem, NEIGHBOR_CELL_COMMAND, SERVING_CELL_COMMAND};
use crate::parser::{looks_like_qeng, parse_neighbor, parse_serving};
use crate::stats::ScanStats;
use crate::store::SharedState;
use crate::tower::{SignalSample, TowerSnapshot};

/// Callback invoked on the worker task with the committed snapshot.
pub type ScanCallback = Box<dyn FnOnce(TowerSnapshot) + Send + 'static>;

/// A scan callback travelling with its Measure command.
///
/// `epoch` is the cancellation epoch at the time of the request; the worker
/// only installs the callback if no cancellation happened since.
pub struct PendingCallback {
    epoch: u64,
    callback: ScanCallback,
}

/// Commands accepted by the worker.
pub enum Command {
    /// Perform a tower scan, optionally reporting to a callback
    Measure(Option<PendingCallback>),
    /// Leave the loop and retire the task
    Exit,
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Measure(None) => write!(f, "Measure"),
            Command::Measure(Some(_)) => write!(f, "Measure(callback)"),
            Command::Exit => write!(f, "Exit"),
        }
    }
}

#[derive(Default)]
struct SlotState {
    epoch: u64,
    callback: Option<ScanCallback>,
}

/// Holder for the callback of the scan in progress, shared by the scanner
/// and worker.
///
/// Only the scan the worker is running has its callback here; callbacks of
/// queued scans wait inside their [`Command`].
#[derive(Default)]
pub struct CallbackSlot {
    state: Mutex<SlotState>,
}

impl CallbackSlot {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Tag `callback` with the current cancellation epoch so it can be queued.
    pub fn prepare(&self, callback: ScanCallback) -> PendingCallback {
        PendingCallback {
            epoch: self.lock().epoch,
            callback,
        }
    }

    /// Make `pending` the callback of the scan about to run.
    ///
    /// Returns false and drops it if a cancellation happened after it was
    /// prepared.
    pub fn install(&self, pending: PendingCallback) -> bool {
        let mut state = self.lock();
        if pending.epoch != state.epoch {
            return false;
        }
        state.callback = Some(pending.callback);
        true
    }

    /// Drop the callback of the running scan and void every callback still
    /// queued.
    pub fn cancel(&self) {
        let mut state = self.lock();
        state.epoch = state.epoch.wrapping_add(1);
        state.callback = None;
    }

    /// Remove and return the callback of the running scan.
    pub fn take(&self) -> Option<ScanCallback> {
        self.lock().callback.take()
    }

    pub fn is_registered(&self) -> bool {
        self.lock().callback.is_some()
    }
}

/// Seconds since the scanner started, counting from 1.
///
/// 0 is reserved for "never sampled" in [`SignalSample`].
#[derive(Debug, Clone, Copy)]
pub struct Uptime {
    started: Instant,
}

impl Uptime {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    pub fn now_secs(&self) -> u64 {
        self.started.elapsed().as_secs() + 1
    }
}

/// Timing knobs for the worker loop.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// How long to wait on the queue before sampling signal strength again.
    pub poll_period: Duration,

    /// Timeout for each QENG command.
    pub command_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_period: Duration::from_secs(1),
            command_timeout: Duration::from_secs(10),
        }
    }
}

/// State owned by the worker task.
pub struct Worker<M> {
    modem: Arc<M>,
    state: Arc<SharedState>,
    callback: Arc<CallbackSlot>,
    stats: Arc<ScanStats>,
    config: WorkerConfig,
    uptime: Uptime,

    /// Snapshot being assembled from modem responses; only this task touches it.
    receiving: TowerSnapshot,
}

impl<M: Modem> Worker<M> {
    pub fn new(
        modem: Arc<M>,
        state: Arc<SharedState>,
        callback: Arc<CallbackSlot>,
        stats: Arc<ScanStats>,
        config: WorkerConfig,
        uptime: Uptime,
    ) -> Self {
        Self {
            modem,
            state,
            callback,
            stats,
            config,
            uptime,
            receiving: TowerSnapshot::default(),
        }
    }

    /// Run the worker loop until an Exit command arrives or every sender is
    /// dropped.
    pub async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        debug!("Scan worker started");

        loop {
            let command = self.wait_on_command(&mut commands).await;

            let ready = self.modem.is_ready().await;
            if ready {
                self.sample_signal().await;
            }

            match command {
                None => {}
                Some(Command::Exit) => break,
                Some(Command::Measure(pending)) => {
                    if let Some(pending) = pending {
                        if !self.callback.install(pending) {
                            debug!("Scan callback cancelled before the scan started");
                        }
                    }
                    self.measure(ready).await;
                }
            }
        }

        debug!("Scan worker exiting");
    }

    /// Wait for a command, returning `None` when the poll period elapses.
    async fn wait_on_command(&self, commands: &mut mpsc::Receiver<Command>) -> Option<Command> {
        match timeout(self.config.poll_period, commands.recv()).await {
            Ok(Some(command)) => Some(command),
            // Every scanner handle is gone
            Ok(None) => Some(Command::Exit),
            Err(_) => None,
        }
    }

    async fn sample_signal(&self) {
        let reading = self.modem.sample_signal().await;
        let usable = reading.is_usable();

        if usable {
            self.state.commit_signal(SignalSample {
                reading,
                uptime_secs: self.uptime.now_secs(),
            });
        } else {
            self.state.invalidate_signal();
        }
        self.stats.record_signal(usable);
    }

    async fn measure(&mut self, ready: bool) {
        if !ready {
            debug!("Modem not ready, clearing tower info");
            self.state.clear_snapshot();
            self.stats.record_not_ready();
            self.invoke_callback();
            return;
        }

        let started = Instant::now();
        self.receiving.clear();

        let receiving = &mut self.receiving;
        let stats = &self.stats;
        let status = self
            .modem
            .issue_command(
                SERVING_CELL_COMMAND,
                self.config.command_timeout,
                &mut |line: &str| {
                    if !looks_like_qeng(line) {
                        debug!("Non-QENG line: {}", line);
                        return;
                    }
                    match parse_serving(line) {
                        Ok(serving) => receiving.serving = serving,
                        Err(e) => {
                            debug!("Serving cell parse error for '{}': {}", line, e);
                            receiving.serving.clear();
                            stats.record_serving_parse_failure();
                        }
                    }
                },
            )
            .await;
        self.check_completion(SERVING_CELL_COMMAND, status);

        let receiving = &mut self.receiving;
        let stats = &self.stats;
        let status = self
            .modem
            .issue_command(
                NEIGHBOR_CELL_COMMAND,
                self.config.command_timeout,
                &mut |line: &str| {
                    if !looks_like_qeng(line) {
                        debug!("Non-QENG line: {}", line);
                        return;
                    }
                    match parse_neighbor(line) {
                        Ok(neighbor) => receiving.neighbors.push(neighbor),
                        Err(e) => {
                            debug!("Neighbor cell parse error for '{}': {}", line, e);
                            stats.record_neighbor_parse_failure();
                        }
                    }
                },
            )
            .await;
        self.check_completion(NEIGHBOR_CELL_COMMAND, status);

        self.state.commit_snapshot(&self.receiving);
        self.stats.record_scan(&self.receiving, started.elapsed());

        info!(
            "Scan complete in {} ms: serving={} neighbors={}",
            started.elapsed().as_millis(),
            if self.receiving.is_valid() {
                self.receiving.serving.to_string()
            } else {
                "none".to_string()
            },
            self.receiving.neighbors.len()
        );

        self.invoke_callback();
    }

    fn check_completion(&self, command: &str, status: CompletionStatus) {
        self.stats.record_completion(status);
        if status != CompletionStatus::Ok {
            warn!("{} finished with {}", command, status);
        }
    }

    /// Hand the committed snapshot to the registered callback, if any.
    ///
    /// The callback is taken out of its slot before it runs, so a
    /// cancellation that lands after this point cannot stop it.
    fn invoke_callback(&self) {
        if let Some(callback) = self.callback.take() {
            callback(self.state.snapshot_copy());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modem::mock::{NEIGHBOR_LINES, ScriptedModem};
    use crate::tower::RadioAccessTechnology;
    use std::sync::atomic::Ordering;

    type Harness = (
        Worker<ScriptedModem>,
        Arc<SharedState>,
        Arc<CallbackSlot>,
        Arc<ScanStats>,
    );

    fn make_worker(modem: Arc<ScriptedModem>) -> Harness {
        let state = Arc::new(SharedState::new());
        let callback = Arc::new(CallbackSlot::new());
        let stats = Arc::new(ScanStats::new());
        let worker = Worker::new(
            modem,
            Arc::clone(&state),
            Arc::clone(&callback),
            Arc::clone(&stats),
            WorkerConfig::default(),
            Uptime::start(),
        );
        (worker, state, callback, stats)
    }

    #[tokio::test(start_paused = true)]
    async fn test_measure_commits_snapshot() {
        let modem = Arc::new(ScriptedModem::new());
        let (mut worker, state, _, stats) = make_worker(Arc::clone(&modem));

        worker.measure(true).await;

        let snapshot = state.snapshot_copy();
        assert!(snapshot.is_valid());
        assert_eq!(snapshot.serving.rat, RadioAccessTechnology::Lte);
        assert_eq!(snapshot.neighbors.len(), NEIGHBOR_LINES.len());
        assert_eq!(snapshot.neighbors[1].neighbor_id, 77);
        assert_eq!(modem.commands_issued(), 2);
        assert_eq!(stats.scans_completed.load(Ordering::Relaxed), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_neighbor_lines_are_skipped() {
        let modem = Arc::new(ScriptedModem::new());
        {
            let mut lines = modem.neighbor_lines.lock().unwrap();
            lines.insert(1, r#"+QENG: "neighbourcell intra","LTE",garbage"#.to_string());
            lines.push(r#"+QENG: "neighbourcell","GSM",262,02,1A2B,3C,5,-70"#.to_string());
        }
        let (mut worker, state, _, stats) = make_worker(Arc::clone(&modem));

        worker.measure(true).await;

        let snapshot = state.snapshot_copy();
        assert!(snapshot.is_valid());
        assert_eq!(snapshot.neighbors.len(), NEIGHBOR_LINES.len());
        assert_eq!(
            stats.neighbor_parse_failures.load(Ordering::Relaxed),
            2
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_ready_clears_saved_and_fires_callback() {
        let modem = Arc::new(ScriptedModem::new());
        let (mut worker, state, callback, _) = make_worker(Arc::clone(&modem));

        worker.measure(true).await;
        assert!(state.snapshot_copy().is_valid());

        let (tx, rx) = std::sync::mpsc::channel();
        let pending = callback.prepare(Box::new(move |snapshot: TowerSnapshot| {
            let _ = tx.send(snapshot);
        }));
        assert!(callback.install(pending));

        worker.measure(false).await;

        let delivered = rx.try_recv().expect("callback should fire");
        assert!(!delivered.is_valid());
        assert!(delivered.neighbors.is_empty());
        assert!(!state.snapshot_copy().is_valid());
        assert_eq!(modem.commands_issued(), 2);
        assert!(!callback.is_registered());
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_qeng_lines_are_ignored() {
        let modem = Arc::new(ScriptedModem::new());
        modem.serving_lines.lock().unwrap().push("RDY".to_string());
        modem.neighbor_lines.lock().unwrap().insert(0, "+CEREG: 5".to_string());
        let (mut worker, state, _, stats) = make_worker(Arc::clone(&modem));

        worker.measure(true).await;

        let snapshot = state.snapshot_copy();
        assert!(snapshot.is_valid());
        assert_eq!(snapshot.neighbors.len(), NEIGHBOR_LINES.len());
        assert_eq!(stats.serving_parse_failures.load(Ordering::Relaxed), 0);
        assert_eq!(stats.neighbor_parse_failures.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_cancel_voids_prepared_callback() {
        let slot = CallbackSlot::new();

        let stale = slot.prepare(Box::new(|_: TowerSnapshot| {}));
        slot.cancel();
        let fresh = slot.prepare(Box::new(|_: TowerSnapshot| {}));

        assert!(!slot.install(stale));
        assert!(!slot.is_registered());
        assert!(slot.install(fresh));
        assert!(slot.is_registered());

        slot.cancel();
        assert!(slot.take().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_installs_callback_on_dequeue() {
        let modem = Arc::new(ScriptedModem::new());
        let (worker, state, callback, _) = make_worker(modem);
        let (tx, rx) = mpsc::channel(1);
        let (done_tx, done_rx) = std::sync::mpsc::channel();

        let handle = tokio::spawn(worker.run(rx));
        let pending = callback.prepare(Box::new(move |snapshot: TowerSnapshot| {
            let _ = done_tx.send(snapshot);
        }));
        assert!(!callback.is_registered());

        tx.send(Command::Measure(Some(pending))).await.unwrap();
        tx.send(Command::Exit).await.unwrap();
        handle.await.unwrap();

        let delivered = done_rx.try_recv().expect("callback should fire");
        assert_eq!(delivered, state.snapshot_copy());
        assert!(!callback.is_registered());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_command_keeps_parsed_lines() {
        let modem = Arc::new(ScriptedModem::new());
        modem.set_delay(Duration::from_secs(12));
        *modem.command_timeout.lock().unwrap() = Some(Duration::from_secs(10));
        let (mut worker, state, _, stats) = make_worker(Arc::clone(&modem));

        worker.measure(true).await;

        let snapshot = state.snapshot_copy();
        assert!(snapshot.is_valid());
        assert_eq!(snapshot.neighbors.len(), NEIGHBOR_LINES.len());
        assert_eq!(stats.command_timeouts.load(Ordering::Relaxed), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_signal_sampling() {
        let modem = Arc::new(ScriptedModem::new());
        let (worker, state, _, _) = make_worker(Arc::clone(&modem));

        worker.sample_signal().await;
        let sample = state.signal_copy(10, worker.uptime.now_secs()).expect("fresh sample");
        assert_eq!(sample.reading.strength, -95.0);

        modem.set_signal(0.0, 0.0);
        worker.sample_signal().await;
        assert_eq!(state.signal_uptime(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_exits_on_command() {
        let modem = Arc::new(ScriptedModem::new());
        let (worker, state, _, _) = make_worker(Arc::clone(&modem));
        let (tx, rx) = mpsc::channel(1);

        let handle = tokio::spawn(worker.run(rx));
        tx.send(Command::Measure(None)).await.unwrap();
        tx.send(Command::Exit).await.unwrap();
        handle.await.unwrap();

        assert!(state.snapshot_copy().is_valid());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_exits_when_senders_dropped() {
        let modem = Arc::new(ScriptedModem::new());
        let (worker, _, _, _) = make_worker(modem);
        let (tx, rx) = mpsc::channel(1);

        let handle = tokio::spawn(worker.run(rx));
        drop(tx);
        handle.await.unwrap();
    }
}
