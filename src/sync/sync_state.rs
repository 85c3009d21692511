//! # Sync State
//!
//! What the UI is allowed to see of the sync core: the unsynced item count
//! and the outcome of the latest run, published through watch channels.

use crate::sync::engine::SyncResult;
use crate::sync::network_monitor::NetworkStatus;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;

/// Snapshot for a status banner
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncStatusSummary {
    pub network: NetworkStatus,
    pub is_syncing: bool,
    /// Unsynced items (routes plus queued remote deletes)
    pub pending: u64,
    pub last_sync: Option<DateTime<Utc>>,
    pub needs_reauth: bool,
    /// Messages of the latest run
    pub errors: Vec<String>,
}

/// Latest run and timestamp
#[derive(Debug, Clone, PartialEq)]
pub struct RunRecord {
    pub finished_at: DateTime<Utc>,
    pub result: SyncResult,
}

/// Publishes pending counts and run results
#[derive(Debug)]
pub struct SyncStatePublisher {
    pending: watch::Sender<u64>,
    last_run: watch::Sender<Option<RunRecord>>,
}

impl Default for SyncStatePublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncStatePublisher {
    pub fn new() -> Self {
        let (pending, _) = watch::channel(0);
        let (last_run, _) = watch::channel(None);
        Self { pending, last_run }
    }

    pub fn publish_pending(&self, count: u64) {
        self.pending.send_replace(count);
    }

    pub fn publish_run(&self, result: &SyncResult) {
        self.last_run.send_replace(Some(RunRecord {
            finished_at: Utc::now(),
            result: result.clone(),
        }));
    }

    pub fn pending(&self) -> u64 {
        *self.pending.borrow()
    }

    pub fn last_run(&self) -> Option<RunRecord> {
        self.last_run.borrow().clone()
    }

    pub fn watch_pending(&self) -> watch::Receiver<u64> {
        self.pending.subscribe()
    }

    pub fn watch_runs(&self) -> watch::Receiver<Option<RunRecord>> {
        self.last_run.subscribe()
    }

    /// Build a summary from the published values
    pub fn summary(&self, network: NetworkStatus, is_syncing: bool) -> SyncStatusSummary {
        let last_run = self.last_run();
        SyncStatusSummary {
            network,
            is_syncing,
            pending: self.pending(),
            last_sync: last_run.as_ref().map(|run| run.finished_at),
            needs_reauth: last_run.as_ref().is_some_and(|run| run.result.needs_reauth),
            errors: last_run.map(|run| run.result.messages).unwrap_or_default(),
        }
    }
}
