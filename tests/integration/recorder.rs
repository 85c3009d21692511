//! Capture path: recording, overflow and hand-off to sync

use crate::common::{epoch, memory_store, test_config};
use crate::{assert_approx_eq, assert_ok};
use chrono::Duration;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use trailsync::offline::{RouteRecorder, StorageRetry};
use trailsync::remote::InMemoryRemote;
use trailsync::shared::config::RecordingSettings;
use trailsync::shared::SyncStatus;
use trailsync::sync::SyncEngine;

#[tokio::test]
async fn test_overflow_drops_oldest_samples_without_blocking() {
    let store = memory_store().await;
    let settings = RecordingSettings {
        buffer_capacity: 16,
        flush_batch_size: 8,
    };
    let recorder = assert_ok!(
        RouteRecorder::start(Arc::clone(&store), &settings, StorageRetry::default(), "user-1", "burst").await
    );

    // no await in between: the writer cannot run until we yield
    for i in 0..100 {
        recorder.record(35.0 + 0.0001 * i as f64, 139.0, None, epoch() + Duration::seconds(i));
    }
    assert_eq!(recorder.buffered(), 16);

    let summary = assert_ok!(recorder.finish().await);
    assert_eq!(summary.dropped, 84);
    assert_eq!(summary.persisted, 16);
    assert_eq!(summary.lost, 0);

    let sequences: Vec<i64> = summary.route.points.iter().map(|p| p.sequence).collect();
    assert_eq!(sequences, (84..100).collect::<Vec<i64>>());
    assert!(!summary.route.recording);
    assert_eq!(summary.route.sync_status, SyncStatus::Pending);
    assert_eq!(summary.route.duration_s, 15);
}

#[tokio::test]
async fn test_recorded_route_syncs_after_finish() {
    let store = memory_store().await;
    let recorder = assert_ok!(
        RouteRecorder::start(
            Arc::clone(&store),
            &RecordingSettings::default(),
            StorageRetry::default(),
            "user-1",
            "evening walk",
        )
        .await
    );
    let route_id = recorder.route_id();

    for i in 0..30 {
        recorder.record(35.0 + 0.0001 * i as f64, 139.0, Some(40.0), epoch() + Duration::seconds(i * 2));
        if i % 10 == 0 {
            tokio::task::yield_now().await;
        }
    }
    // still recording: not eligible for sync
    assert_eq!(store.count_pending().await.unwrap(), 0);

    let summary = assert_ok!(recorder.finish().await);
    assert_eq!(summary.route.points.len(), 30);
    assert_approx_eq!(summary.route.distance_m, 322.5, 1.0);

    let remote = Arc::new(InMemoryRemote::new());
    let engine = SyncEngine::new(Arc::clone(&store), remote.clone(), test_config());
    let result = engine.run_sync().await;

    assert_eq!(result.synced_count, 1);
    let remote_id = InMemoryRemote::remote_id_for(&route_id.to_string());
    assert_eq!(remote.points_for(&remote_id).len(), 30);
}
