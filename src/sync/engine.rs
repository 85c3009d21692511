//! # Sync Engine
//!
//! Drains pending routes and queued remote deletions to the remote store.
//!
//! ## Run lifecycle
//!
//! 1. `run_sync` takes the run slot. If a run is already in flight the
//!    caller joins it and receives the same [`SyncResult`].
//! 2. The run executes on its own task, so it finishes even when every
//!    caller is dropped, and clears the slot when done.
//! 3. Pending routes are snapshotted oldest first and uploaded one by one:
//!    header, then the points the remote has not confirmed, in batches.
//! 4. Queued remote deletions are drained.
//! 5. The pending count and the result are published.
//!
//! ## Failure handling
//!
//! | Kind       | Route outcome                                             |
//! |------------|-----------------------------------------------------------|
//! | Network    | `Pending` with backoff; `Failed` once attempts run out    |
//! | Auth       | refresh once; otherwise `Pending`, run stops, re-auth     |
//! | Conflict   | counted as success                                        |
//! | Validation | `Failed`, message kept verbatim                           |
//! | Storage    | bounded local retries, then reported in the run messages  |

use crate::local_db::{CompletionOutcome, LocalRouteStore, StoreError};
use crate::offline::retry::{RetryDecision, RetryPolicy, StorageRetry};
use crate::remote::{RemoteRouteStore, RouteHeader};
use crate::shared::route::Route;
use crate::shared::{AppConfig, Disposition, SyncError};
use crate::sync::metrics::SyncMetrics;
use crate::sync::sync_state::SyncStatePublisher;
use chrono::Utc;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

/// Engine tuning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Maximum points per insert call
    pub point_batch_size: usize,
    /// Deadline for each individual remote call
    pub call_timeout: Duration,
    pub retry: RetryPolicy,
    pub storage_retry: StorageRetry,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for SyncConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            point_batch_size: config.remote.point_batch_size.max(1),
            call_timeout: Duration::from_secs(config.remote.call_timeout_secs.max(1)),
            retry: RetryPolicy::from(&config.sync),
            storage_retry: StorageRetry::from(&config.sync),
        }
    }
}

/// Aggregate outcome of one sync run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncResult {
    pub run_id: u64,
    /// Routes claimed for upload
    pub attempted: usize,
    /// Routes that reached the remote (including duplicates)
    pub synced_count: usize,
    /// Routes that ended the run in error (retry scheduled or `Failed`)
    pub failed_count: usize,
    /// Human-readable problems, validation messages verbatim
    pub messages: Vec<String>,
    /// The session could not be refreshed; the user must sign in again
    pub needs_reauth: bool,
    pub deletions_attempted: usize,
    pub deletions_completed: usize,
}

impl SyncResult {
    fn new(run_id: u64) -> Self {
        Self {
            run_id,
            ..Self::default()
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failed_count == 0 && self.messages.is_empty() && !self.needs_reauth
    }
}

type SharedRun = Shared<BoxFuture<'static, SyncResult>>;

#[derive(Default)]
struct RunSlot {
    current: Option<(u64, SharedRun)>,
}

/// Upload state of the route being processed
#[derive(Debug, Clone)]
struct UploadProgress {
    remote_id: Option<String>,
    uploaded: usize,
}

enum UploadOutcome {
    Uploaded(String),
    /// The route disappeared locally while uploading
    Deleted(Option<String>),
}

struct EngineInner {
    store: Arc<LocalRouteStore>,
    remote: Arc<dyn RemoteRouteStore>,
    config: SyncConfig,
    metrics: Mutex<SyncMetrics>,
    state: SyncStatePublisher,
    run_counter: AtomicU64,
}

/// Offline-first sync engine
///
/// Cheap to clone; clones share the run slot.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
    slot: Arc<Mutex<RunSlot>>,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("config", &self.inner.config)
            .field("running", &self.is_running())
            .finish()
    }
}

impl SyncEngine {
    pub fn new(store: Arc<LocalRouteStore>, remote: Arc<dyn RemoteRouteStore>, config: SyncConfig) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                store,
                remote,
                config,
                metrics: Mutex::new(SyncMetrics::new()),
                state: SyncStatePublisher::new(),
                run_counter: AtomicU64::new(0),
            }),
            slot: Arc::new(Mutex::new(RunSlot::default())),
        }
    }

    /// Run a sync pass, or join the one already in flight
    pub async fn run_sync(&self) -> SyncResult {
        let run = {
            let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
            match &slot.current {
                Some((run_id, run)) => {
                    tracing::debug!("Joining sync run {} already in flight", run_id);
                    run.clone()
                }
                None => {
                    let run_id = self.inner.run_counter.fetch_add(1, Ordering::SeqCst) + 1;
                    let run = self.spawn_run(run_id);
                    slot.current = Some((run_id, run.clone()));
                    run
                }
            }
        };
        run.await
    }

    fn spawn_run(&self, run_id: u64) -> SharedRun {
        let inner = Arc::clone(&self.inner);
        let slot = Arc::clone(&self.slot);
        let task = tokio::spawn(async move {
            let result = inner.execute(run_id).await;
            release_slot(&slot, run_id);
            result
        });

        let slot = Arc::clone(&self.slot);
        let joined: BoxFuture<'static, SyncResult> = Box::pin(async move {
            match task.await {
                Ok(result) => result,
                Err(e) => {
                    release_slot(&slot, run_id);
                    tracing::error!("Sync run {} aborted: {}", run_id, e);
                    SyncResult {
                        messages: vec![format!("sync run aborted: {}", e)],
                        ..SyncResult::new(run_id)
                    }
                }
            }
        });
        joined.shared()
    }

    pub fn is_running(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .current
            .is_some()
    }

    pub fn metrics(&self) -> SyncMetrics {
        self.inner.metrics.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &Arc<LocalRouteStore> {
        &self.inner.store
    }

    /// Pending count and last result channels
    pub fn state(&self) -> &SyncStatePublisher {
        &self.inner.state
    }
}

fn release_slot(slot: &Mutex<RunSlot>, run_id: u64) {
    let mut slot = slot.lock().unwrap_or_else(|e| e.into_inner());
    if matches!(&slot.current, Some((current, _)) if *current == run_id) {
        slot.current = None;
    }
}

impl EngineInner {
    async fn execute(&self, run_id: u64) -> SyncResult {
        self.metrics().record_run_start();
        tracing::info!("Sync run {} started", run_id);

        let mut result = SyncResult::new(run_id);
        match self.storage("recover_interrupted", || self.store.recover_interrupted()).await {
            Ok(0) => {}
            Ok(recovered) => tracing::warn!("Requeued {} routes left in Syncing", recovered),
            Err(e) => result.messages.push(format!("could not requeue interrupted routes: {}", e)),
        }
        self.drain_routes(&mut result).await;
        if result.needs_reauth {
            tracing::warn!("Sync run {} stopped: session expired", run_id);
        } else {
            self.drain_deletions(&mut result).await;
        }

        match self.storage("count_pending", || self.store.count_pending()).await {
            Ok(pending) => self.state.publish_pending(pending),
            Err(e) => result.messages.push(format!("could not count pending routes: {}", e)),
        }
        self.state.publish_run(&result);
        self.metrics().record_run_end(&result);

        tracing::info!(
            "Sync run {} finished: {} attempted, {} synced, {} failed, {}/{} deletions",
            run_id,
            result.attempted,
            result.synced_count,
            result.failed_count,
            result.deletions_completed,
            result.deletions_attempted
        );
        result
    }

    fn metrics(&self) -> std::sync::MutexGuard<'_, SyncMetrics> {
        self.metrics.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn drain_routes(&self, result: &mut SyncResult) {
        let pending = match self.storage("list_pending", || self.store.list_pending()).await {
            Ok(pending) => pending,
            Err(e) => {
                tracing::error!("Could not read pending routes: {}", e);
                result.messages.push(format!("could not read pending routes: {}", e));
                return;
            }
        };
        tracing::debug!("{} routes pending", pending.len());

        for route in pending {
            if result.needs_reauth {
                break;
            }
            self.sync_route(route.id, result).await;
        }
    }

    async fn sync_route(&self, route_id: Uuid, result: &mut SyncResult) {
        let route = match self.storage("mark_syncing", || self.store.mark_syncing(route_id)).await {
            Ok(Some(route)) => route,
            Ok(None) => {
                tracing::debug!("Route {} no longer pending, skipped", route_id);
                return;
            }
            Err(e) => {
                result.messages.push(format!("route '{}': {}", route_id, e));
                return;
            }
        };
        result.attempted += 1;

        let mut progress = UploadProgress {
            remote_id: route.remote_id.clone(),
            uploaded: route.uploaded_points.min(route.points.len()),
        };
        let mut refreshed = false;

        loop {
            let error = match self.upload(&route, &mut progress).await {
                Ok(UploadOutcome::Uploaded(remote_id)) => {
                    self.complete(&route, &remote_id, result).await;
                    return;
                }
                Ok(UploadOutcome::Deleted(remote_id)) => {
                    self.forget_deleted(&route, remote_id, result).await;
                    return;
                }
                Err(error) => error,
            };

            match error.disposition() {
                Disposition::RefreshSession if !refreshed => {
                    refreshed = true;
                    if self.remote.refresh_session().await {
                        tracing::info!("Session refreshed, retrying route {}", route.id);
                        continue;
                    }
                    self.require_reauth(&route, &error, result).await;
                }
                Disposition::RefreshSession => self.require_reauth(&route, &error, result).await,
                Disposition::Retry => self.retry_later(&route, &error, result).await,
                Disposition::Permanent => self.fail(&route, route.retry_count, &error, result).await,
                Disposition::TreatAsSuccess => {
                    let remote_id = progress.remote_id.clone().unwrap_or_else(|| route.id.to_string());
                    self.complete(&route, &remote_id, result).await;
                }
                Disposition::Surface => {
                    tracing::error!("Route {} hit a storage failure: {}", route.id, error);
                    result.failed_count += 1;
                    result.messages.push(format!("{}: {}", route.title, error));
                    if let Err(e) = self
                        .storage("restore_pending", || self.store.restore_pending(route.id, error.message()))
                        .await
                    {
                        tracing::error!("Route {} could not be requeued: {}", route.id, e);
                        result.messages.push(format!("{}: could not requeue: {}", route.title, e));
                    }
                }
            }
            return;
        }
    }

    /// Send the header and any unconfirmed points
    async fn upload(&self, route: &Route, progress: &mut UploadProgress) -> Result<UploadOutcome, SyncError> {
        let header = RouteHeader::from(route);

        let remote_id = match self.call(self.remote.upsert_route(&header)).await {
            Ok(remote_id) => remote_id,
            Err(e) if e.disposition() == Disposition::TreatAsSuccess => {
                // already stored remotely; nothing left to send
                let remote_id = progress.remote_id.clone().unwrap_or_else(|| header.id.clone());
                tracing::debug!("Route {} already present remotely as {}", route.id, remote_id);
                progress.uploaded = route.points.len();
                if !self.record_progress(route.id, &remote_id, progress.uploaded).await? {
                    return Ok(UploadOutcome::Deleted(Some(remote_id)));
                }
                return Ok(UploadOutcome::Uploaded(remote_id));
            }
            Err(e) => return Err(e),
        };

        progress.remote_id = Some(remote_id.clone());
        if !self.record_progress(route.id, &remote_id, progress.uploaded).await? {
            return Ok(UploadOutcome::Deleted(Some(remote_id)));
        }

        let batch_size = self.config.point_batch_size.max(1);
        while progress.uploaded < route.points.len() {
            let end = (progress.uploaded + batch_size).min(route.points.len());
            let batch = &route.points[progress.uploaded..end];

            match self.call(self.remote.insert_points(&remote_id, batch)).await {
                Ok(()) => {}
                Err(e) if e.disposition() == Disposition::TreatAsSuccess => {
                    tracing::debug!("Point batch of route {} already stored", route.id);
                }
                Err(e) => return Err(e),
            }

            progress.uploaded = end;
            self.metrics().record_points(batch.len());
            if !self.record_progress(route.id, &remote_id, progress.uploaded).await? {
                return Ok(UploadOutcome::Deleted(Some(remote_id)));
            }
        }

        Ok(UploadOutcome::Uploaded(remote_id))
    }

    async fn record_progress(&self, route_id: Uuid, remote_id: &str, uploaded: usize) -> Result<bool, SyncError> {
        self.storage("record_uploaded_points", || {
            self.store.record_uploaded_points(route_id, remote_id, uploaded)
        })
        .await
    }

    async fn complete(&self, route: &Route, remote_id: &str, result: &mut SyncResult) {
        match self
            .storage("complete_sync", || self.store.complete_sync(route.id, remote_id))
            .await
        {
            Ok(CompletionOutcome::Synced) => {
                tracing::debug!("Route {} synced as {}", route.id, remote_id);
                result.synced_count += 1;
            }
            Ok(CompletionOutcome::Requeued) => {
                tracing::debug!("Route {} edited during upload, requeued", route.id);
                result.synced_count += 1;
            }
            Ok(CompletionOutcome::Missing) => {
                self.forget_deleted(route, Some(remote_id.to_string()), result).await;
            }
            Err(e) => {
                tracing::error!("Could not record sync of route {}: {}", route.id, e);
                result.failed_count += 1;
                result.messages.push(format!("{}: {}", route.title, e));
            }
        }
    }

    /// The route was deleted locally mid-upload; undo the remote copy later
    async fn forget_deleted(&self, route: &Route, remote_id: Option<String>, result: &mut SyncResult) {
        let Some(remote_id) = remote_id else {
            return;
        };
        tracing::info!("Route {} deleted during upload, queueing remote delete", route.id);
        if let Err(e) = self
            .storage("enqueue_remote_delete", || self.store.enqueue_remote_delete(&remote_id))
            .await
        {
            result
                .messages
                .push(format!("could not queue remote delete of {}: {}", remote_id, e));
        }
    }

    async fn retry_later(&self, route: &Route, error: &SyncError, result: &mut SyncResult) {
        let failures = route.retry_count.saturating_add(1);
        match self.config.retry.decide(failures, Utc::now()) {
            RetryDecision::RetryAt(at) => {
                tracing::warn!(
                    "Route {} failed (attempt {}/{}), retrying after {}: {}",
                    route.id,
                    failures,
                    self.config.retry.max_attempts,
                    at,
                    error
                );
                result.failed_count += 1;
                result.messages.push(format!("{}: {}", route.title, error));
                if let Err(e) = self
                    .storage("schedule_retry", || {
                        self.store.schedule_retry(route.id, failures, at, error.message())
                    })
                    .await
                {
                    result.messages.push(format!("{}: {}", route.title, e));
                }
            }
            RetryDecision::GiveUp => self.fail(route, failures, error, result).await,
        }
    }

    async fn fail(&self, route: &Route, retry_count: u32, error: &SyncError, result: &mut SyncResult) {
        tracing::error!("Route {} failed permanently: {}", route.id, error);
        result.failed_count += 1;
        result.messages.push(error.to_string());
        let message = error.to_string();
        if let Err(e) = self
            .storage("mark_failed", || self.store.mark_failed(route.id, retry_count, &message))
            .await
        {
            result.messages.push(format!("{}: {}", route.title, e));
        }
    }

    async fn require_reauth(&self, route: &Route, error: &SyncError, result: &mut SyncResult) {
        tracing::warn!("Session could not be refreshed: {}", error);
        result.needs_reauth = true;
        result.messages.push(format!("sign in again to continue syncing ({})", error.message()));
        if let Err(e) = self
            .storage("restore_pending", || self.store.restore_pending(route.id, error.message()))
            .await
        {
            result.messages.push(format!("{}: {}", route.title, e));
        }
    }

    async fn drain_deletions(&self, result: &mut SyncResult) {
        let deletions = match self
            .storage("list_pending_deletions", || self.store.list_pending_deletions())
            .await
        {
            Ok(deletions) => deletions,
            Err(e) => {
                result.messages.push(format!("could not read queued deletions: {}", e));
                return;
            }
        };

        for deletion in deletions {
            if result.needs_reauth {
                break;
            }
            result.deletions_attempted += 1;
            let remote_id = deletion.remote_id.as_str();
            let mut refreshed = false;

            loop {
                let error = match self.call(self.remote.delete_route(remote_id)).await {
                    Ok(()) => None,
                    Err(e) if e.disposition() == Disposition::TreatAsSuccess => None,
                    Err(e) => Some(e),
                };

                let Some(error) = error else {
                    match self.storage("complete_deletion", || self.store.complete_deletion(remote_id)).await {
                        Ok(()) => result.deletions_completed += 1,
                        Err(e) => result.messages.push(format!("remote delete of {}: {}", remote_id, e)),
                    }
                    break;
                };

                match error.disposition() {
                    Disposition::RefreshSession if !refreshed => {
                        refreshed = true;
                        if self.remote.refresh_session().await {
                            continue;
                        }
                        result.needs_reauth = true;
                        result
                            .messages
                            .push(format!("sign in again to continue syncing ({})", error.message()));
                    }
                    Disposition::RefreshSession => {
                        result.needs_reauth = true;
                        result
                            .messages
                            .push(format!("sign in again to continue syncing ({})", error.message()));
                    }
                    Disposition::Retry => {
                        let attempts = match self
                            .storage("fail_deletion", || self.store.fail_deletion(remote_id, error.message()))
                            .await
                        {
                            Ok(attempts) => attempts,
                            Err(e) => {
                                // the attempt was not counted, keep the row for the next run
                                tracing::error!("Could not record failed delete of {}: {}", remote_id, e);
                                result.messages.push(format!("remote delete of {}: {}", remote_id, e));
                                break;
                            }
                        };
                        if attempts >= self.config.retry.max_attempts {
                            tracing::error!("Giving up deleting remote route {}: {}", remote_id, error);
                            result
                                .messages
                                .push(format!("gave up deleting remote route {}: {}", remote_id, error));
                            self.drop_deletion(remote_id, result).await;
                        } else {
                            tracing::warn!("Remote delete of {} failed, will retry: {}", remote_id, error);
                        }
                    }
                    Disposition::Permanent => {
                        tracing::error!("Remote delete of {} rejected: {}", remote_id, error);
                        result.messages.push(error.to_string());
                        self.drop_deletion(remote_id, result).await;
                    }
                    Disposition::TreatAsSuccess | Disposition::Surface => {
                        result.messages.push(format!("remote delete of {}: {}", remote_id, error));
                    }
                }
                break;
            }
        }
    }

    /// Remove a queued delete that will not be attempted again
    async fn drop_deletion(&self, remote_id: &str, result: &mut SyncResult) {
        if let Err(e) = self
            .storage("complete_deletion", || self.store.complete_deletion(remote_id))
            .await
        {
            result
                .messages
                .push(format!("could not drop queued delete of {}: {}", remote_id, e));
        }
    }

    /// Apply the per-call deadline
    async fn call<T>(&self, future: BoxFuture<'_, Result<T, SyncError>>) -> Result<T, SyncError> {
        match tokio::time::timeout(self.config.call_timeout, future).await {
            Ok(outcome) => outcome,
            Err(_) => Err(SyncError::timeout(self.config.call_timeout)),
        }
    }

    async fn storage<T, F, Fut>(&self, label: &str, op: F) -> Result<T, SyncError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        self.config
            .storage_retry
            .run(label, op)
            .await
            .map_err(SyncError::from)
    }
}
