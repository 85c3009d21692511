//! Route recorder
//!
//! Capture path for a live recording. [`RouteRecorder::record`] only assigns
//! a sequence number and pushes into a [`PointBuffer`]; a background task
//! moves batches into the store. Storage stalls therefore never reach the
//! GPS callback, at the price of dropping the oldest samples if the writer
//! falls too far behind.

use crate::local_db::{LocalRouteStore, StoreError};
use crate::offline::buffer::{PointBuffer, PushOutcome};
use crate::offline::retry::StorageRetry;
use crate::shared::config::RecordingSettings;
use crate::shared::geo;
use crate::shared::route::{Route, RoutePoint};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Writer task counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterStats {
    pub persisted: u64,
    /// Points in batches that failed after all storage retries
    pub lost: u64,
}

/// Outcome of a finished recording
#[derive(Debug, Clone)]
pub struct RecordingSummary {
    /// The finalized route as stored
    pub route: Route,
    pub persisted: u64,
    /// Samples evicted from the full buffer
    pub dropped: u64,
    pub lost: u64,
}

/// A recording in progress
#[derive(Debug)]
pub struct RouteRecorder {
    store: Arc<LocalRouteStore>,
    route_id: Uuid,
    buffer: Arc<PointBuffer>,
    writer: Option<JoinHandle<WriterStats>>,
}

impl RouteRecorder {
    /// Create the route and start the writer task
    pub async fn start(
        store: Arc<LocalRouteStore>,
        settings: &RecordingSettings,
        retry: StorageRetry,
        owner_id: impl Into<String>,
        title: impl Into<String>,
    ) -> Result<Self, StoreError> {
        let mut route = Route::new(owner_id, title);
        route.recording = true;
        store.create(&route).await?;

        let buffer = Arc::new(PointBuffer::new(settings.buffer_capacity));
        let writer = tokio::spawn(run_writer(
            Arc::clone(&store),
            route.id,
            Arc::clone(&buffer),
            settings.flush_batch_size.max(1),
            retry,
        ));

        tracing::info!("Recording started for route {}", route.id);
        Ok(Self {
            store,
            route_id: route.id,
            buffer,
            writer: Some(writer),
        })
    }

    pub fn route_id(&self) -> Uuid {
        self.route_id
    }

    /// Capture one fix; never waits on storage
    ///
    /// Returns the sequence number assigned to the sample.
    pub fn record(&self, latitude: f64, longitude: f64, altitude: Option<f64>, at: DateTime<Utc>) -> i64 {
        let (sequence, outcome) = self
            .buffer
            .push(|sequence| RoutePoint::new(sequence, latitude, longitude, altitude, at));
        match outcome {
            PushOutcome::Queued => {}
            PushOutcome::DroppedOldest(old) => {
                tracing::warn!(
                    "Capture buffer full for route {}, dropped sample {}",
                    self.route_id,
                    old.sequence
                );
            }
            PushOutcome::Closed => {
                tracing::warn!("Sample {} recorded after route {} was closed", sequence, self.route_id);
            }
        }
        sequence
    }

    /// Samples currently waiting for the writer
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Flush remaining samples and finalize the route as `Pending`
    pub async fn finish(mut self) -> Result<RecordingSummary, StoreError> {
        self.buffer.close();
        let stats = match self.writer.take() {
            Some(handle) => handle.await.map_err(|e| StoreError::Task(e.to_string()))?,
            None => WriterStats::default(),
        };

        let stored = self
            .store
            .get(self.route_id)
            .await?
            .ok_or(StoreError::NotFound(self.route_id))?;
        let distance = geo::path_length(&stored.points);
        let duration = match (stored.points.first(), stored.points.last()) {
            (Some(first), Some(last)) => (last.timestamp - first.timestamp).num_seconds().max(0),
            _ => 0,
        };
        self.store.finish_recording(self.route_id, distance, duration).await?;

        let route = self
            .store
            .get(self.route_id)
            .await?
            .ok_or(StoreError::NotFound(self.route_id))?;
        let dropped = self.buffer.dropped_count();

        tracing::info!(
            "Recording finished for route {}: {} points, {:.0} m, {} s ({} dropped, {} lost)",
            self.route_id,
            route.points.len(),
            distance,
            duration,
            dropped,
            stats.lost
        );

        Ok(RecordingSummary {
            route,
            persisted: stats.persisted,
            dropped,
            lost: stats.lost,
        })
    }
}

impl Drop for RouteRecorder {
    fn drop(&mut self) {
        // lets the writer drain and exit if finish() was never called
        self.buffer.close();
    }
}

async fn run_writer(
    store: Arc<LocalRouteStore>,
    route_id: Uuid,
    buffer: Arc<PointBuffer>,
    batch_size: usize,
    retry: StorageRetry,
) -> WriterStats {
    let mut stats = WriterStats::default();

    while buffer.wait().await {
        let batch = buffer.drain_batch(batch_size);
        if batch.is_empty() {
            continue;
        }

        let store = &store;
        let points = &batch;
        match retry
            .run("append_points", move || store.append_points(route_id, points))
            .await
        {
            Ok(()) => stats.persisted += batch.len() as u64,
            Err(e) => {
                tracing::error!(
                    "Lost {} samples of route {} after storage retries: {}",
                    batch.len(),
                    route_id,
                    e
                );
                stats.lost += batch.len() as u64;
            }
        }
    }

    stats
}
