//! # Sync Metrics
//!
//! Counters for sync runs, kept in memory for diagnostics.

use crate::sync::engine::SyncResult;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Default)]
pub struct SyncMetrics {
    pub runs_started: u64,
    pub runs_completed: u64,
    pub routes_synced: u64,
    pub routes_failed: u64,
    pub points_uploaded: u64,
    pub deletions_completed: u64,
    pub average_run_duration: Duration,
    pub last_run_duration: Option<Duration>,
    last_run_start: Option<Instant>,
}

impl SyncMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_run_start(&mut self) {
        self.last_run_start = Some(Instant::now());
        self.runs_started += 1;
    }

    pub fn record_points(&mut self, count: usize) {
        self.points_uploaded += count as u64;
    }

    pub fn record_run_end(&mut self, result: &SyncResult) {
        self.routes_synced += result.synced_count as u64;
        self.routes_failed += result.failed_count as u64;
        self.deletions_completed += result.deletions_completed as u64;

        if let Some(start) = self.last_run_start.take() {
            let duration = start.elapsed();
            self.last_run_duration = Some(duration);
            self.runs_completed += 1;

            // Update rolling average
            let completed = self.runs_completed.min(u32::MAX as u64) as u32;
            let total = self.average_run_duration * (completed - 1) + duration;
            self.average_run_duration = total / completed;
        }
    }

    /// Share of attempted routes that synced
    pub fn success_rate(&self) -> f64 {
        let attempted = self.routes_synced + self.routes_failed;
        if attempted == 0 {
            0.0
        } else {
            self.routes_synced as f64 / attempted as f64
        }
    }
}
