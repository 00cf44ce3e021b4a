//! Lock-protected handoff of scan results and signal samples.
//!
//! The worker commits completed snapshots and signal samples here; any task
//! may copy them out. Every read and write goes through one mutex and holds it
//! only for the copy itself, never across modem I/O.

use std::sync::{Mutex, MutexGuard, PoisonError};

use thiserror::Error;

use crate::tower::{SignalSample, TowerSnapshot};

/// Errors returned when reading the cached signal sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SignalError {
    #[error("No signal sample available")]
    NoData,

    #[error("Signal sample is {age_secs}s old (max {max_age_secs}s)")]
    Stale { age_secs: u64, max_age_secs: u64 },
}

#[derive(Debug, Default)]
struct Inner {
    saved: TowerSnapshot,
    signal: SignalSample,
}

/// Last completed tower snapshot and last signal sample.
#[derive(Debug, Default)]
pub struct SharedState {
    inner: Mutex<Inner>,
}

impl SharedState {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Guarded data is plain values, a poisoned lock is still usable.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Deep copy of the last committed snapshot.
    pub fn snapshot_copy(&self) -> TowerSnapshot {
        self.lock().saved.clone()
    }

    /// Copy of the last signal sample if it is no older than `max_age_secs`
    /// at uptime `now_secs`.
    pub fn signal_copy(&self, max_age_secs: u64, now_secs: u64) -> Result<SignalSample, SignalError> {
        let inner = self.lock();
        let sample = inner.signal;

        if !sample.is_sampled() {
            return Err(SignalError::NoData);
        }
        let age_secs = now_secs.saturating_sub(sample.uptime_secs);
        if age_secs > max_age_secs {
            return Err(SignalError::Stale {
                age_secs,
                max_age_secs,
            });
        }

        Ok(sample)
    }

    /// Uptime second of the last signal sample, 0 if none is cached.
    pub fn signal_uptime(&self) -> u64 {
        self.lock().signal.uptime_secs
    }

    /// Replace the saved snapshot.
    pub fn commit_snapshot(&self, snapshot: &TowerSnapshot) {
        self.lock().saved.clone_from(snapshot);
    }

    pub fn clear_snapshot(&self) {
        self.lock().saved.clear();
    }

    pub fn commit_signal(&self, sample: SignalSample) {
        self.lock().signal = sample;
    }

    /// Mark the cached sample as never taken so readers get `NoData`.
    pub fn invalidate_signal(&self) {
        self.lock().signal.uptime_secs = 0;
    }
}
