//! On-disk store: restart survival and resumption of interrupted work

use crate::assert_err;
use crate::common::{epoch, route_at, test_config};
use chrono::Duration;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use trailsync::local_db::{LocalRouteStore, StoreError};
use trailsync::remote::{CallKind, InMemoryRemote};
use trailsync::shared::{RoutePoint, SyncError, SyncStatus};
use trailsync::sync::SyncEngine;

#[tokio::test]
async fn test_pending_work_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("nested").join("routes.db");
    let route = route_at("kept", epoch(), 5);

    {
        let store = LocalRouteStore::open(&db_path).await.unwrap();
        store.create(&route).await.unwrap();
        store.enqueue_remote_delete("remote-old").await.unwrap();
        store.close().await;
    }

    let store = LocalRouteStore::open(&db_path).await.unwrap();
    let reloaded = store.get(route.id).await.unwrap().unwrap();
    assert_eq!(reloaded.points, route.points);
    assert_eq!(reloaded.created_at, route.created_at);
    assert_eq!(reloaded.sync_status, SyncStatus::Pending);
    assert_eq!(store.count_pending().await.unwrap(), 2);
    assert!(store.schema_version().await.unwrap() >= 1);
}

#[tokio::test]
async fn test_upload_interrupted_by_shutdown_resumes() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("routes.db");
    let remote = Arc::new(InMemoryRemote::new());
    let route = route_at("long", epoch(), 25);

    {
        let store = Arc::new(LocalRouteStore::open(&db_path).await.unwrap());
        store.create(&route).await.unwrap();
        remote.fail_nth(CallKind::InsertPoints, 2, SyncError::network("HTTP_502", "bad gateway"));
        let engine = SyncEngine::new(Arc::clone(&store), remote.clone(), test_config());
        let result = engine.run_sync().await;
        assert_eq!(result.failed_count, 1);

        // simulate a crash mid-upload on top of the confirmed batch
        sqlx::query("UPDATE routes SET sync_status = 'syncing'")
            .execute(store.pool())
            .await
            .unwrap();
        store.close().await;
    }

    let store = Arc::new(LocalRouteStore::open(&db_path).await.unwrap());
    assert_eq!(store.recover_interrupted().await.unwrap(), 1);
    let recovered = store.get(route.id).await.unwrap().unwrap();
    assert_eq!(recovered.sync_status, SyncStatus::Pending);
    assert_eq!(recovered.uploaded_points, 10);

    let engine = SyncEngine::new(Arc::clone(&store), remote.clone(), test_config());
    let result = engine.run_sync().await;
    assert_eq!(result.synced_count, 1);

    // batches of 10: ok, failed, then the remaining two
    assert_eq!(remote.count_calls(CallKind::InsertPoints), 4);
    let remote_id = InMemoryRemote::remote_id_for(&route.id.to_string());
    assert_eq!(remote.points_for(&remote_id).len(), 25);
}

#[tokio::test]
async fn test_out_of_order_append_leaves_no_partial_write() {
    let dir = tempfile::tempdir().unwrap();
    let store = LocalRouteStore::open(&dir.path().join("routes.db")).await.unwrap();
    let mut route = route_at("live", epoch(), 3);
    route.recording = true;
    store.create(&route).await.unwrap();

    let at = epoch() + Duration::minutes(1);
    let batch = vec![
        RoutePoint::new(3, 35.1, 139.1, None, at),
        RoutePoint::new(5, 35.2, 139.2, None, at),
        RoutePoint::new(4, 35.3, 139.3, None, at),
    ];
    assert_err!(
        store.append_points(route.id, &batch).await,
        StoreError::InvalidSequence { .. }
    );

    let stored = store.get(route.id).await.unwrap().unwrap();
    assert_eq!(stored.points.len(), 3);
    assert_eq!(stored.last_sequence(), Some(2));
}
