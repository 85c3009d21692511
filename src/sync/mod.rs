//! # Sync Service
//!
//! Offline-first synchronization of recorded routes.
//!
//! ## Architecture
//!
//! - **Network Monitor**: debounced Online/Offline transitions
//! - **Engine**: coalesced sync runs with classification and backoff
//! - **Scheduler**: runs the engine on every Online transition
//! - **Sync State**: pending count and last result for the UI
//! - **Metrics**: run counters for diagnostics
//!
//! [`SyncService`] owns all of them; it is the only surface the UI talks to.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use trailsync::sync::SyncService;
//!
//! let mut service = SyncService::open(&config, remote).await?;
//! service.start_auto_sync();
//!
//! let result = service.sync_now().await;
//! println!("{} synced, {} still pending", result.synced_count, service.pending_count().await?);
//! ```

pub mod engine;
pub mod metrics;
pub mod network_monitor;
pub mod scheduler;
pub mod sync_state;

pub use engine::{SyncConfig, SyncEngine, SyncResult};
pub use metrics::SyncMetrics;
pub use network_monitor::{
    ConnectivityMonitor, ConnectivityState, DebounceConfig, HttpProbe, MonitorHandle, NetworkStatus, Reachability,
    ReachabilityProbe,
};
pub use scheduler::AutoSync;
pub use sync_state::{RunRecord, SyncStatePublisher, SyncStatusSummary};

use crate::local_db::{LocalRouteStore, StoreError};
use crate::remote::RemoteRouteStore;
use crate::shared::AppConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Main sync service coordinator
#[derive(Debug)]
pub struct SyncService {
    store: Arc<LocalRouteStore>,
    engine: SyncEngine,
    monitor: Arc<ConnectivityMonitor>,
    /// Background auto-sync task
    auto_sync: Option<AutoSync>,
    polling: Option<MonitorHandle>,
}

impl SyncService {
    pub fn new(
        store: Arc<LocalRouteStore>,
        remote: Arc<dyn RemoteRouteStore>,
        monitor: Arc<ConnectivityMonitor>,
        config: SyncConfig,
    ) -> Self {
        let engine = SyncEngine::new(Arc::clone(&store), remote, config);
        Self {
            store,
            engine,
            monitor,
            auto_sync: None,
            polling: None,
        }
    }

    /// Open the configured store, recover interrupted uploads and publish
    /// the initial pending count
    pub async fn open(config: &AppConfig, remote: Arc<dyn RemoteRouteStore>) -> Result<Self, StoreError> {
        let store = Arc::new(LocalRouteStore::open(&config.db_path()).await?);
        store.recover_interrupted().await?;

        let monitor = Arc::new(ConnectivityMonitor::from_settings(&config.connectivity));
        let service = Self::new(store, remote, monitor, SyncConfig::from(config));
        service.refresh_pending().await?;
        Ok(service)
    }

    /// Sync on every Online transition and when a retry backoff expires
    pub fn start_auto_sync(&mut self) {
        if self.auto_sync.as_ref().is_some_and(AutoSync::is_active) {
            tracing::debug!("Auto-sync already running");
            return;
        }
        self.auto_sync = Some(AutoSync::spawn(self.engine.clone(), Arc::clone(&self.monitor)));
    }

    /// Sample `probe` periodically and feed the connectivity monitor
    pub fn start_polling(&mut self, probe: Arc<dyn ReachabilityProbe>, interval: Duration) {
        self.polling = Some(self.monitor.spawn_polling(probe, interval));
    }

    /// Run a sync now, or join the run already in flight
    pub async fn sync_now(&self) -> SyncResult {
        self.engine.run_sync().await
    }

    /// Unsynced items: unfinished routes plus queued remote deletes
    pub async fn pending_count(&self) -> Result<u64, StoreError> {
        self.store.count_pending().await
    }

    /// Re-read the pending count and publish it
    pub async fn refresh_pending(&self) -> Result<u64, StoreError> {
        let pending = self.store.count_pending().await?;
        self.engine.state().publish_pending(pending);
        Ok(pending)
    }

    /// Pending count, updated after every run
    pub fn watch_pending(&self) -> watch::Receiver<u64> {
        self.engine.state().watch_pending()
    }

    pub fn status(&self) -> SyncStatusSummary {
        self.engine
            .state()
            .summary(self.monitor.state().status, self.engine.is_running())
    }

    pub fn store(&self) -> &Arc<LocalRouteStore> {
        &self.store
    }

    pub fn engine(&self) -> &SyncEngine {
        &self.engine
    }

    pub fn monitor(&self) -> &Arc<ConnectivityMonitor> {
        &self.monitor
    }

    /// Stop background tasks; an in-flight run still completes
    pub async fn shutdown(&mut self) {
        if let Some(mut auto_sync) = self.auto_sync.take() {
            auto_sync.stop();
        }
        if let Some(polling) = self.polling.take() {
            polling.stop().await;
        }
        tracing::info!("Sync service stopped");
    }
}
