//! # Auto-sync Scheduler
//!
//! Listens for connectivity transitions and starts a sync run on every
//! confirmed Online transition. While online it also sleeps until the
//! earliest route backoff expires and syncs again, so a retryable failure
//! does not wait for the next connectivity change. A manual `sync_now`
//! landing at the same moment joins the same run through the engine's run
//! slot.
//!
//! After a run that needs reauthentication the timer stays off until the
//! next Online transition.

use crate::sync::engine::{SyncEngine, SyncResult};
use crate::sync::network_monitor::{ConnectivityMonitor, NetworkStatus};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

/// Shortest sleep before a timer-driven run
const MIN_RETRY_WAKE: Duration = Duration::from_millis(100);

/// Background task driving automatic syncs
#[derive(Debug)]
pub struct AutoSync {
    task: Option<JoinHandle<()>>,
}

impl AutoSync {
    pub fn spawn(engine: SyncEngine, monitor: Arc<ConnectivityMonitor>) -> Self {
        let mut events = monitor.subscribe();
        let task = tokio::spawn(async move {
            let mut reauth_paused = false;
            loop {
                let wake = if monitor.is_online() && !reauth_paused {
                    next_wake(&engine).await
                } else {
                    None
                };
                let retry_timer = async move {
                    match wake {
                        Some(at) => {
                            let delay = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                            tokio::time::sleep(delay.max(MIN_RETRY_WAKE)).await
                        }
                        None => std::future::pending::<()>().await,
                    }
                };

                let result: SyncResult = tokio::select! {
                    event = events.recv() => match event {
                        Ok(state) if state.status == NetworkStatus::Online => {
                            tracing::info!("Back online, starting sync");
                            reauth_paused = false;
                            engine.run_sync().await
                        }
                        Ok(_) => {
                            tracing::info!("Offline, automatic sync paused");
                            continue;
                        }
                        Err(RecvError::Lagged(missed)) => {
                            tracing::warn!("Missed {} connectivity events, syncing to catch up", missed);
                            engine.run_sync().await
                        }
                        Err(RecvError::Closed) => break,
                    },
                    _ = retry_timer => {
                        tracing::info!("Retry backoff elapsed, starting sync");
                        engine.run_sync().await
                    }
                };

                if result.needs_reauth {
                    tracing::warn!("Automatic retries paused until reauthentication");
                }
                reauth_paused = result.needs_reauth;
                tracing::debug!("Automatic sync run {} done", result.run_id);
            }
            tracing::debug!("Auto-sync stopped");
        });

        Self { task: Some(task) }
    }

    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn next_wake(engine: &SyncEngine) -> Option<DateTime<Utc>> {
    match engine.store().next_retry_due().await {
        Ok(due) => due,
        Err(e) => {
            tracing::warn!("Could not read retry schedule: {}", e);
            None
        }
    }
}

impl Drop for AutoSync {
    fn drop(&mut self) {
        self.stop();
    }
}
