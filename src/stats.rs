//! Statistics tracking for tower scans.
//!
//! This module provides structures for tracking what the scan worker does:
//! completed scans and how long they took, parse failures on modem output,
//! command timeouts, signal sampling, and a breakdown of serving cells by
//! radio access technology.

use hdrhistogram::Histogram;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::modem::CompletionStatus;
use crate::tower::{RadioAccessTechnology, TowerSnapshot};

/// Thread-safe statistics collector for the scan worker.
#[derive(Debug)]
pub struct ScanStats {
    /// Scans that ran both QENG queries and committed a snapshot
    pub scans_completed: AtomicU64,

    /// Scans that committed a valid serving cell
    pub scans_valid: AtomicU64,

    /// Scans skipped because the modem was not ready
    pub scans_not_ready: AtomicU64,

    /// Scan requests rejected because one was already queued
    pub busy_rejections: AtomicU64,

    /// Serving cell lines that failed to parse
    pub serving_parse_failures: AtomicU64,

    /// Neighbor cell lines that failed to parse (and were dropped)
    pub neighbor_parse_failures: AtomicU64,

    /// Modem commands that hit their timeout
    pub command_timeouts: AtomicU64,

    /// Modem commands that ended with an error
    pub command_errors: AtomicU64,

    /// Usable signal samples committed
    pub signal_samples: AtomicU64,

    /// Signal readings that carried no usable value
    pub stale_samples: AtomicU64,

    /// Total neighbor cells committed
    pub neighbors_seen: AtomicU64,

    /// Histogram of scan durations in milliseconds
    duration_histogram: RwLock<Histogram<u64>>,

    /// Histogram of neighbor counts per scan
    neighbor_histogram: RwLock<Histogram<u64>>,

    /// Valid scans per serving cell RAT
    scans_by_rat: RwLock<HashMap<RadioAccessTechnology, u64>>,

    /// When stats collection started
    start_time: Instant,
}

impl ScanStats {
    /// Create a new statistics collector.
    pub fn new() -> Self {
        Self {
            scans_completed: AtomicU64::new(0),
            scans_valid: AtomicU64::new(0),
            scans_not_ready: AtomicU64::new(0),
            busy_rejections: AtomicU64::new(0),
            serving_parse_failures: AtomicU64::new(0),
            neighbor_parse_failures: AtomicU64::new(0),
            command_timeouts: AtomicU64::new(0),
            command_errors: AtomicU64::new(0),
            signal_samples: AtomicU64::new(0),
            stale_samples: AtomicU64::new(0),
            neighbors_seen: AtomicU64::new(0),
            // Duration histogram: 1 ms to 2 minutes, 3 significant figures
            duration_histogram: RwLock::new(
                Histogram::new_with_bounds(1, 120_000, 3)
                    .expect("Failed to create duration histogram"),
            ),
            // Neighbor histogram: offset by 1 so empty scans can be recorded
            neighbor_histogram: RwLock::new(
                Histogram::new_with_bounds(1, 100, 2).expect("Failed to create neighbor histogram"),
            ),
            scans_by_rat: RwLock::new(HashMap::new()),
            start_time: Instant::now(),
        }
    }

    /// Record a committed scan and how long the modem exchange took.
    pub fn record_scan(&self, snapshot: &TowerSnapshot, duration: Duration) {
        self.scans_completed.fetch_add(1, Ordering::Relaxed);

        let millis = (duration.as_millis() as u64).clamp(1, 120_000);
        if let Ok(mut hist) = self.duration_histogram.write() {
            let _ = hist.record(millis);
        }

        if !snapshot.is_valid() {
            return;
        }
        self.scans_valid.fetch_add(1, Ordering::Relaxed);

        let neighbors = snapshot.neighbors.len() as u64;
        self.neighbors_seen.fetch_add(neighbors, Ordering::Relaxed);
        if let Ok(mut hist) = self.neighbor_histogram.write() {
            let _ = hist.record((neighbors + 1).min(100));
        }

        if let Ok(mut map) = self.scans_by_rat.write() {
            *map.entry(snapshot.serving.rat).or_insert(0) += 1;
        }
    }

    pub fn record_not_ready(&self) {
        self.scans_not_ready.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_busy(&self) {
        self.busy_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_serving_parse_failure(&self) {
        self.serving_parse_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_neighbor_parse_failure(&self) {
        self.neighbor_parse_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the final status of a modem command.
    pub fn record_completion(&self, status: CompletionStatus) {
        match status {
            CompletionStatus::Ok => {}
            CompletionStatus::Error => {
                self.command_errors.fetch_add(1, Ordering::Relaxed);
            }
            CompletionStatus::Timeout => {
                self.command_timeouts.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Record the outcome of a signal sample.
    pub fn record_signal(&self, usable: bool) {
        if usable {
            self.signal_samples.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stale_samples.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Get the elapsed time since stats collection started.
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Generate a summary report.
    pub fn summary(&self) -> StatsSummary {
        let duration_percentiles = self
            .duration_histogram
            .read()
            .ok()
            .filter(|h| !h.is_empty())
            .map(|h| HistogramPercentiles {
                p50: h.value_at_quantile(0.50),
                p90: h.value_at_quantile(0.90),
                p99: h.value_at_quantile(0.99),
                min: h.min(),
                max: h.max(),
                mean: h.mean(),
            });

        let neighbor_percentiles = self
            .neighbor_histogram
            .read()
            .ok()
            .filter(|h| !h.is_empty())
            .map(|h| HistogramPercentiles {
                // Subtract 1 to get back to real neighbor counts
                p50: h.value_at_quantile(0.50).saturating_sub(1),
                p90: h.value_at_quantile(0.90).saturating_sub(1),
                p99: h.value_at_quantile(0.99).saturating_sub(1),
                min: h.min().saturating_sub(1),
                max: h.max().saturating_sub(1),
                mean: h.mean() - 1.0,
            });

        let scans_by_rat = self
            .scans_by_rat
            .read()
            .map(|m| m.iter().map(|(k, v)| (k.to_string(), *v)).collect())
            .unwrap_or_default();

        StatsSummary {
            elapsed_secs: self.elapsed().as_secs_f64(),
            scans_completed: self.scans_completed.load(Ordering::Relaxed),
            scans_valid: self.scans_valid.load(Ordering::Relaxed),
            scans_not_ready: self.scans_not_ready.load(Ordering::Relaxed),
            busy_rejections: self.busy_rejections.load(Ordering::Relaxed),
            serving_parse_failures: self.serving_parse_failures.load(Ordering::Relaxed),
            neighbor_parse_failures: self.neighbor_parse_failures.load(Ordering::Relaxed),
            command_timeouts: self.command_timeouts.load(Ordering::Relaxed),
            command_errors: self.command_errors.load(Ordering::Relaxed),
            signal_samples: self.signal_samples.load(Ordering::Relaxed),
            stale_samples: self.stale_samples.load(Ordering::Relaxed),
            neighbors_seen: self.neighbors_seen.load(Ordering::Relaxed),
            duration_percentiles,
            neighbor_percentiles,
            scans_by_rat,
        }
    }
}

impl Default for ScanStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Percentile values from a histogram.
#[derive(Debug, Clone, Serialize)]
pub struct HistogramPercentiles {
    pub p50: u64,
    pub p90: u64,
    pub p99: u64,
    pub min: u64,
    pub max: u64,
    pub mean: f64,
}

/// Summary of collected statistics.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSummary {
    pub elapsed_secs: f64,
    pub scans_completed: u64,
    pub scans_valid: u64,
    pub scans_not_ready: u64,
    pub busy_rejections: u64,
    pub serving_parse_failures: u64,
    pub neighbor_parse_failures: u64,
    pub command_timeouts: u64,
    pub command_errors: u64,
    pub signal_samples: u64,
    pub stale_samples: u64,
    pub neighbors_seen: u64,
    pub duration_percentiles: Option<HistogramPercentiles>,
    pub neighbor_percentiles: Option<HistogramPercentiles>,
    pub scans_by_rat: HashMap<String, u64>,
}

impl std::fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "═══════════════════════════════════════════════════════")?;
        writeln!(f, "                 TOWER SCAN STATISTICS")?;
        writeln!(f, "═══════════════════════════════════════════════════════")?;
        writeln!(f)?;
        writeln!(f, "Runtime: {:.1}s", self.elapsed_secs)?;
        writeln!(f, "Scans completed: {}", self.scans_completed)?;
        writeln!(
            f,
            "Scans with serving cell: {} ({:.1}%)",
            self.scans_valid,
            if self.scans_completed > 0 {
                self.scans_valid as f64 / self.scans_completed as f64 * 100.0
            } else {
                0.0
            }
        )?;
        writeln!(f, "Scans with modem not ready: {}", self.scans_not_ready)?;
        writeln!(f, "Busy rejections: {}", self.busy_rejections)?;
        writeln!(
            f,
            "Parse failures: serving {}, neighbor {}",
            self.serving_parse_failures, self.neighbor_parse_failures
        )?;
        writeln!(
            f,
            "Command timeouts: {}, errors: {}",
            self.command_timeouts, self.command_errors
        )?;
        writeln!(
            f,
            "Signal samples: {} (stale {})",
            self.signal_samples, self.stale_samples
        )?;
        writeln!(f, "Neighbors seen: {}", self.neighbors_seen)?;
        writeln!(f)?;

        if let Some(ref p) = self.duration_percentiles {
            writeln!(f, "Scan Duration (ms):")?;
            writeln!(f, "  Min: {}, Max: {}, Mean: {:.1}", p.min, p.max, p.mean)?;
            writeln!(f, "  P50: {}, P90: {}, P99: {}", p.p50, p.p90, p.p99)?;
            writeln!(f)?;
        }

        if let Some(ref p) = self.neighbor_percentiles {
            writeln!(f, "Neighbors per Scan:")?;
            writeln!(f, "  Min: {}, Max: {}, Mean: {:.1}", p.min, p.max, p.mean)?;
            writeln!(f, "  P50: {}, P90: {}, P99: {}", p.p50, p.p90, p.p99)?;
            writeln!(f)?;
        }

        if !self.scans_by_rat.is_empty() {
            writeln!(f, "Scans by RAT:")?;
            let mut rats: Vec<_> = self.scans_by_rat.iter().collect();
            rats.sort_by(|a, b| b.1.cmp(a.1));
            for (rat, count) in rats {
                writeln!(f, "  {}: {}", rat, count)?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tower::{NeighborCell, ServingCell};

    fn make_test_snapshot(neighbors: usize) -> TowerSnapshot {
        TowerSnapshot {
            serving: ServingCell {
                rat: RadioAccessTechnology::LteCatM1,
                mcc: 310,
                mnc: 410,
                cell_id: 0xA1B2C3,
                lac: 0xB00C,
                signal_power: -100,
            },
            neighbors: vec![NeighborCell::default(); neighbors],
        }
    }

    #[test]
    fn test_record_scan() {
        let stats = ScanStats::new();

        stats.record_scan(&make_test_snapshot(3), Duration::from_millis(250));
        stats.record_scan(&TowerSnapshot::default(), Duration::from_millis(40));

        assert_eq!(stats.scans_completed.load(Ordering::Relaxed), 2);
        assert_eq!(stats.scans_valid.load(Ordering::Relaxed), 1);
        assert_eq!(stats.neighbors_seen.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn test_record_completion() {
        let stats = ScanStats::new();

        stats.record_completion(CompletionStatus::Ok);
        stats.record_completion(CompletionStatus::Timeout);
        stats.record_completion(CompletionStatus::Error);
        stats.record_completion(CompletionStatus::Timeout);

        assert_eq!(stats.command_timeouts.load(Ordering::Relaxed), 2);
        assert_eq!(stats.command_errors.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_summary_generation() {
        let stats = ScanStats::new();

        for _ in 0..10 {
            stats.record_scan(&make_test_snapshot(2), Duration::from_millis(120));
        }
        stats.record_serving_parse_failure();
        stats.record_neighbor_parse_failure();
        stats.record_busy();
        stats.record_not_ready();
        stats.record_signal(true);
        stats.record_signal(false);

        let summary = stats.summary();

        assert_eq!(summary.scans_completed, 10);
        assert_eq!(summary.scans_valid, 10);
        assert_eq!(summary.serving_parse_failures, 1);
        assert_eq!(summary.neighbor_parse_failures, 1);
        assert_eq!(summary.busy_rejections, 1);
        assert_eq!(summary.scans_not_ready, 1);
        assert_eq!(summary.signal_samples, 1);
        assert_eq!(summary.stale_samples, 1);
        assert_eq!(summary.scans_by_rat.get("lte-cat-m1"), Some(&10));

        let neighbors = summary
            .neighbor_percentiles
            .as_ref()
            .expect("neighbor histogram");
        assert_eq!(neighbors.p50, 2);

        let text = summary.to_string();
        assert!(text.contains("Scans completed: 10"));
    }

    #[test]
    fn test_empty_summary_has_no_percentiles() {
        let summary = ScanStats::new().summary();
        assert!(summary.duration_percentiles.is_none());
        assert!(summary.neighbor_percentiles.is_none());
    }
}
