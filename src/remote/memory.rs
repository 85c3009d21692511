//! In-process route store
//!
//! Behaves like the REST backend (idempotent upserts, duplicate detection,
//! per-call latency) while letting callers script failures and inspect the
//! calls that were made. Used by previews and the test suites.

use super::{RemoteRouteStore, RouteHeader};
use crate::shared::route::RoutePoint;
use crate::shared::SyncError;
use futures_util::future::BoxFuture;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Remote operation kinds, used to target scripted failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    Upsert,
    InsertPoints,
    Delete,
}

/// A call as observed by the remote
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    Upsert { route_id: String },
    InsertPoints { remote_id: String, count: usize },
    Delete { remote_id: String },
}

#[derive(Debug)]
struct ScriptedFailure {
    kind: CallKind,
    /// Matching calls to let through before this failure fires
    skip: usize,
    error: SyncError,
}

#[derive(Debug, Default)]
struct RemoteState {
    routes: BTreeMap<String, RouteHeader>,
    points: HashMap<String, BTreeMap<i64, RoutePoint>>,
    existing: HashSet<String>,
    failures: VecDeque<ScriptedFailure>,
    calls: Vec<RemoteCall>,
    refreshes: u32,
}

/// In-memory [`RemoteRouteStore`]
#[derive(Debug, Default)]
pub struct InMemoryRemote {
    state: Mutex<RemoteState>,
    latency: Duration,
    refresh_succeeds: AtomicBool,
}

impl InMemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every call by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Fail the next call of `kind` with `error`
    pub fn fail_next(&self, kind: CallKind, error: SyncError) {
        self.fail_times(kind, 1, error);
    }

    /// Fail the next `times` calls of `kind` with `error`
    pub fn fail_times(&self, kind: CallKind, times: usize, error: SyncError) {
        let mut state = self.lock();
        for _ in 0..times {
            state.failures.push_back(ScriptedFailure {
                kind,
                skip: 0,
                error: error.clone(),
            });
        }
    }

    /// Let `n - 1` calls of `kind` succeed, then fail the `n`-th
    pub fn fail_nth(&self, kind: CallKind, n: usize, error: SyncError) {
        self.lock().failures.push_back(ScriptedFailure {
            kind,
            skip: n.saturating_sub(1),
            error,
        });
    }

    /// Drop any scripted failures that have not fired
    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    /// Pretend the route was stored by an earlier session: upserts of it conflict
    pub fn mark_existing(&self, route_id: &str) {
        self.lock().existing.insert(route_id.to_string());
    }

    pub fn set_refresh_succeeds(&self, succeeds: bool) {
        self.refresh_succeeds.store(succeeds, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.lock().calls.clone()
    }

    pub fn count_calls(&self, kind: CallKind) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|call| {
                matches!(
                    (kind, call),
                    (CallKind::Upsert, RemoteCall::Upsert { .. })
                        | (CallKind::InsertPoints, RemoteCall::InsertPoints { .. })
                        | (CallKind::Delete, RemoteCall::Delete { .. })
                )
            })
            .count()
    }

    /// Stored route headers keyed by remote id
    pub fn routes(&self) -> Vec<(String, RouteHeader)> {
        self.lock()
            .routes
            .iter()
            .map(|(id, header)| (id.clone(), header.clone()))
            .collect()
    }

    pub fn route_count(&self) -> usize {
        self.lock().routes.len()
    }

    /// Stored points of one route in sequence order
    pub fn points_for(&self, remote_id: &str) -> Vec<RoutePoint> {
        self.lock()
            .points
            .get(remote_id)
            .map(|points| points.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn refresh_count(&self) -> u32 {
        self.lock().refreshes
    }

    /// Remote id this store assigns to a local route id
    pub fn remote_id_for(route_id: &str) -> String {
        format!("r-{}", route_id)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RemoteState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn take_failure(state: &mut RemoteState, kind: CallKind) -> Option<SyncError> {
        let index = state.failures.iter().position(|f| f.kind == kind)?;
        if state.failures[index].skip > 0 {
            state.failures[index].skip -= 1;
            return None;
        }
        state.failures.remove(index).map(|f| f.error)
    }

    async fn delay(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }

    async fn upsert(&self, header: &RouteHeader) -> Result<String, SyncError> {
        self.delay().await;
        let mut state = self.lock();
        state.calls.push(RemoteCall::Upsert {
            route_id: header.id.clone(),
        });
        if let Some(error) = Self::take_failure(&mut state, CallKind::Upsert) {
            return Err(error);
        }
        if state.existing.contains(&header.id) {
            return Err(SyncError::conflict(
                "23505",
                format!("duplicate key value violates unique constraint (id = {})", header.id),
            ));
        }
        let remote_id = Self::remote_id_for(&header.id);
        state.routes.insert(remote_id.clone(), header.clone());
        Ok(remote_id)
    }

    async fn insert(&self, remote_id: &str, points: &[RoutePoint]) -> Result<(), SyncError> {
        self.delay().await;
        let mut state = self.lock();
        state.calls.push(RemoteCall::InsertPoints {
            remote_id: remote_id.to_string(),
            count: points.len(),
        });
        if let Some(error) = Self::take_failure(&mut state, CallKind::InsertPoints) {
            return Err(error);
        }
        let stored = state.points.entry(remote_id.to_string()).or_default();
        for point in points {
            stored.entry(point.sequence).or_insert_with(|| point.clone());
        }
        Ok(())
    }

    async fn delete(&self, remote_id: &str) -> Result<(), SyncError> {
        self.delay().await;
        let mut state = self.lock();
        state.calls.push(RemoteCall::Delete {
            remote_id: remote_id.to_string(),
        });
        if let Some(error) = Self::take_failure(&mut state, CallKind::Delete) {
            return Err(error);
        }
        state.routes.remove(remote_id);
        state.points.remove(remote_id);
        Ok(())
    }
}

impl RemoteRouteStore for InMemoryRemote {
    fn upsert_route<'a>(&'a self, header: &'a RouteHeader) -> BoxFuture<'a, Result<String, SyncError>> {
        Box::pin(self.upsert(header))
    }

    fn insert_points<'a>(
        &'a self,
        remote_id: &'a str,
        points: &'a [RoutePoint],
    ) -> BoxFuture<'a, Result<(), SyncError>> {
        Box::pin(self.insert(remote_id, points))
    }

    fn delete_route<'a>(&'a self, remote_id: &'a str) -> BoxFuture<'a, Result<(), SyncError>> {
        Box::pin(self.delete(remote_id))
    }

    fn refresh_session(&self) -> BoxFuture<'_, bool> {
        Box::pin(async move {
            self.lock().refreshes += 1;
            self.refresh_succeeds.load(Ordering::SeqCst)
        })
    }
}
