//! Simplification cache
//!
//! Long traces are expensive to simplify every frame. Results are cached per
//! route and tolerance step, together with the point count and last sequence
//! number they were derived from, so a trace is only simplified again once
//! its point set changes.

use super::simplify::simplify;
use crate::shared::route::{Route, RoutePoint};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

#[derive(Debug)]
struct CacheEntry {
    point_count: usize,
    last_sequence: Option<i64>,
    points: Arc<Vec<RoutePoint>>,
}

/// Hit/miss counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

/// Cache of simplified traces keyed by route id and tolerance
#[derive(Debug, Default)]
pub struct SimplificationCache {
    entries: Mutex<HashMap<(Uuid, u64), CacheEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl SimplificationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simplified trace of `route` at `tolerance` meters
    pub fn get_or_simplify(&self, route: &Route, tolerance: f64) -> Arc<Vec<RoutePoint>> {
        let key = (route.id, tolerance.to_bits());
        let point_count = route.points.len();
        let last_sequence = route.last_sequence();

        if let Some(entry) = self.lock().get(&key) {
            if entry.point_count == point_count && entry.last_sequence == last_sequence {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Arc::clone(&entry.points);
            }
        }

        // simplify outside the lock; a concurrent miss just computes twice
        self.misses.fetch_add(1, Ordering::Relaxed);
        let points = Arc::new(simplify(&route.points, tolerance));
        self.lock().insert(
            key,
            CacheEntry {
                point_count,
                last_sequence,
                points: Arc::clone(&points),
            },
        );
        tracing::trace!(
            "Simplified route {} from {} to {} points",
            route.id,
            point_count,
            points.len()
        );
        points
    }

    /// Forget every tolerance step of one route
    pub fn invalidate(&self, route_id: Uuid) {
        self.lock().retain(|(id, _), _| *id != route_id);
    }

    /// Drop entries of routes that are not in `route_ids`
    ///
    /// Returns how many entries were evicted.
    pub fn retain_routes(&self, route_ids: impl IntoIterator<Item = Uuid>) -> usize {
        let live: HashSet<Uuid> = route_ids.into_iter().collect();
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|(id, _), _| live.contains(id));
        before - entries.len()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.lock().len(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<(Uuid, u64), CacheEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}
