//! Store, engine and route fixtures

use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use trailsync::local_db::LocalRouteStore;
use trailsync::offline::{BackoffStrategy, RetryPolicy, StorageRetry};
use trailsync::remote::InMemoryRemote;
use trailsync::shared::{Route, RoutePoint};
use trailsync::sync::{ConnectivityMonitor, DebounceConfig, NetworkStatus, SyncConfig, SyncEngine};

/// Fixed instant so traces are reproducible
pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap()
}

/// Fresh in-memory store
pub async fn memory_store() -> Arc<LocalRouteStore> {
    Arc::new(
        LocalRouteStore::open_in_memory()
            .await
            .expect("Failed to open in-memory store"),
    )
}

/// Engine settings for tests: small batches, short deadlines, no real waiting
pub fn test_config() -> SyncConfig {
    SyncConfig {
        point_batch_size: 10,
        call_timeout: StdDuration::from_secs(2),
        retry: RetryPolicy {
            max_attempts: 3,
            backoff: BackoffStrategy::Fixed {
                interval: StdDuration::ZERO,
            },
        },
        storage_retry: StorageRetry {
            attempts: 3,
            pause: StdDuration::from_millis(1),
        },
    }
}

/// Store, remote double and engine wired together
pub struct Harness {
    pub store: Arc<LocalRouteStore>,
    pub remote: Arc<InMemoryRemote>,
    pub engine: SyncEngine,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_remote(InMemoryRemote::new(), test_config()).await
    }

    pub async fn with_remote(remote: InMemoryRemote, config: SyncConfig) -> Self {
        let store = memory_store().await;
        let remote = Arc::new(remote);
        let engine = SyncEngine::new(Arc::clone(&store), remote.clone(), config);
        Self { store, remote, engine }
    }

    /// Store a route created `minutes` after [`epoch`] with `points` fixes
    pub async fn add_route(&self, title: &str, minutes: i64, points: usize) -> Route {
        let route = route_at(title, epoch() + Duration::minutes(minutes), points);
        self.store.create(&route).await.expect("Failed to create route");
        route
    }
}

/// A route with a straight northbound trace
pub fn route_at(title: &str, created_at: DateTime<Utc>, points: usize) -> Route {
    let trace = (0..points)
        .map(|i| {
            RoutePoint::new(
                i as i64,
                35.0 + 0.0001 * i as f64,
                139.0,
                Some(12.0),
                created_at + Duration::seconds(i as i64 * 5),
            )
        })
        .collect();
    Route::new("user-1", title)
        .with_created_at(created_at)
        .with_points(trace)
}

/// Twelve fixes zigzagging across nine corners; the three fixes after
/// corners 1, 4 and 6 sit half a meter off the straight leg
pub fn zigzag_trace() -> Vec<RoutePoint> {
    let corners: Vec<(f64, f64)> = (0..9)
        .map(|i| (35.0 + if i % 2 == 1 { 0.001 } else { 0.0 }, 139.0 + 0.001 * i as f64))
        .collect();

    let mut coords = Vec::new();
    for (i, corner) in corners.iter().enumerate() {
        coords.push(*corner);
        if matches!(i, 1 | 4 | 6) {
            let next = corners[i + 1];
            coords.push(((corner.0 + next.0) / 2.0 + 0.000005, (corner.1 + next.1) / 2.0));
        }
    }

    coords
        .into_iter()
        .enumerate()
        .map(|(i, (lat, lon))| RoutePoint::new(i as i64, lat, lon, None, epoch() + Duration::seconds(i as i64)))
        .collect()
}

/// Monitor that flips on the first agreeing sample
pub fn instant_monitor(initial: NetworkStatus) -> Arc<ConnectivityMonitor> {
    Arc::new(ConnectivityMonitor::new(
        DebounceConfig {
            min_samples: 1,
            min_duration: StdDuration::ZERO,
        },
        initial,
    ))
}
