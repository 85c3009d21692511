//! End-to-end sync scenarios against the in-memory remote

use crate::common::{epoch, instant_monitor, route_at, test_config, Harness};
use crate::{assert_ok, assert_status};
use chrono::Utc;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use trailsync::offline::{BackoffStrategy, RetryPolicy};
use trailsync::remote::{CallKind, InMemoryRemote, RemoteCall};
use trailsync::shared::{RouteEdit, SyncError, SyncStatus};
use trailsync::sync::{NetworkStatus, Reachability, SyncConfig, SyncService};

#[tokio::test]
async fn test_offline_routes_sync_in_creation_order_after_reconnect() {
    let h = Harness::new().await;
    // stored out of order on purpose
    let second = h.add_route("second", 2, 3).await;
    let first = h.add_route("first", 1, 3).await;
    let third = h.add_route("third", 3, 3).await;

    let monitor = instant_monitor(NetworkStatus::Offline);
    let mut service = SyncService::new(Arc::clone(&h.store), h.remote.clone(), Arc::clone(&monitor), test_config());
    assert_eq!(assert_ok!(service.refresh_pending().await), 3);
    service.start_auto_sync();

    let mut runs = service.engine().state().watch_runs();
    monitor.observe(Reachability::Reachable, Utc::now());
    let record = tokio::time::timeout(Duration::from_secs(5), runs.wait_for(|run| run.is_some()))
        .await
        .expect("no sync run after reconnect")
        .expect("state publisher dropped")
        .clone()
        .expect("run record");

    assert_eq!(record.result.synced_count, 3);
    assert!(record.result.is_clean());
    assert_eq!(assert_ok!(service.pending_count().await), 0);
    assert_eq!(*service.watch_pending().borrow(), 0);

    let upserts: Vec<RemoteCall> = h
        .remote
        .calls()
        .into_iter()
        .filter(|call| matches!(call, RemoteCall::Upsert { .. }))
        .collect();
    let expected: Vec<RemoteCall> = [&first, &second, &third]
        .iter()
        .map(|route| RemoteCall::Upsert {
            route_id: route.id.to_string(),
        })
        .collect();
    assert_eq!(upserts, expected);

    for route in [&first, &second, &third] {
        assert_status!(h.store, route.id, SyncStatus::Synced);
    }
    service.shutdown().await;
}

#[tokio::test]
async fn test_duplicate_upload_counts_as_synced() {
    let h = Harness::new().await;
    let route = h.add_route("already there", 0, 4).await;
    h.remote.mark_existing(&route.id.to_string());

    let result = h.engine.run_sync().await;

    assert_eq!(result.synced_count, 1);
    assert_eq!(result.failed_count, 0);
    assert!(result.messages.is_empty());
    assert_eq!(h.remote.count_calls(CallKind::InsertPoints), 0);

    let stored = h.store.get(route.id).await.unwrap().unwrap();
    assert_eq!(stored.sync_status, SyncStatus::Synced);
    assert_eq!(stored.remote_id.as_deref(), Some(route.id.to_string().as_str()));
}

#[tokio::test]
async fn test_concurrent_runs_collapse_into_one() {
    let h = Harness::with_remote(
        InMemoryRemote::new().with_latency(Duration::from_millis(20)),
        test_config(),
    )
    .await;
    h.add_route("a", 0, 2).await;
    h.add_route("b", 1, 2).await;

    let (left, right) = tokio::join!(h.engine.run_sync(), h.engine.run_sync());

    assert_eq!(left, right);
    assert_eq!(left.synced_count, 2);
    assert_eq!(h.remote.count_calls(CallKind::Upsert), 2);
    assert_eq!(h.engine.metrics().runs_started, 1);
    assert!(!h.engine.is_running());

    // the slot is free again afterwards
    let next = h.engine.run_sync().await;
    assert!(next.run_id > left.run_id);
    assert_eq!(next.attempted, 0);
}

#[tokio::test]
async fn test_manual_and_automatic_trigger_share_a_run() {
    let h = Harness::with_remote(
        InMemoryRemote::new().with_latency(Duration::from_millis(30)),
        test_config(),
    )
    .await;
    h.add_route("walk", 0, 3).await;

    let monitor = instant_monitor(NetworkStatus::Offline);
    let mut service = SyncService::new(Arc::clone(&h.store), h.remote.clone(), Arc::clone(&monitor), test_config());
    service.start_auto_sync();

    let (manual, _) = tokio::join!(service.sync_now(), async {
        monitor.observe(Reachability::Reachable, Utc::now());
    });
    // let the automatic trigger finish joining
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(manual.synced_count, 1);
    assert_eq!(h.remote.count_calls(CallKind::Upsert), 1);
    assert_eq!(service.engine().metrics().runs_started, 1);
    service.shutdown().await;
}

#[tokio::test]
async fn test_backoff_expiry_resyncs_without_connectivity_change() {
    let config = SyncConfig {
        retry: RetryPolicy {
            max_attempts: 3,
            backoff: BackoffStrategy::Fixed {
                interval: Duration::from_millis(50),
            },
        },
        ..test_config()
    };
    let h = Harness::with_remote(InMemoryRemote::new(), config.clone()).await;
    let route = h.add_route("flaky", 0, 3).await;
    h.remote
        .fail_next(CallKind::Upsert, SyncError::network("HTTP_503", "service unavailable"));

    let monitor = instant_monitor(NetworkStatus::Offline);
    let mut service = SyncService::new(Arc::clone(&h.store), h.remote.clone(), Arc::clone(&monitor), config);
    service.start_auto_sync();
    monitor.observe(Reachability::Reachable, Utc::now());

    // one Online transition only; the second attempt comes from the retry timer
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let stored = h.store.get(route.id).await.unwrap().unwrap();
            if stored.sync_status == SyncStatus::Synced {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("route never synced after its backoff expired");

    assert_eq!(h.remote.count_calls(CallKind::Upsert), 2);
    assert!(service.engine().metrics().runs_started >= 2);
    service.shutdown().await;
}

#[tokio::test]
async fn test_persistent_network_failure_converges_to_failed() {
    let h = Harness::new().await;
    let route = h.add_route("unlucky", 0, 2).await;
    h.remote
        .fail_times(CallKind::Upsert, 10, SyncError::network("HTTP_503", "service unavailable"));

    // max_attempts is 3: two scheduled retries, then Failed
    for attempt in 1..=2u32 {
        let result = h.engine.run_sync().await;
        assert_eq!(result.failed_count, 1);
        let stored = h.store.get(route.id).await.unwrap().unwrap();
        assert_eq!(stored.sync_status, SyncStatus::Pending);
        assert_eq!(stored.retry_count, attempt);
        assert!(stored.next_retry_at.is_some());
    }
    let last = h.engine.run_sync().await;
    assert_eq!(last.failed_count, 1);
    assert_status!(h.store, route.id, SyncStatus::Failed);

    // nothing is picked up again automatically
    let idle = h.engine.run_sync().await;
    assert_eq!(idle.attempted, 0);
    assert_eq!(h.store.stats().await.unwrap().syncing, 0);

    // an explicit retry brings it back
    h.remote.clear_failures();
    assert!(h.store.retry_failed(route.id).await.unwrap());
    let result = h.engine.run_sync().await;
    assert_eq!(result.synced_count, 1);
    assert_status!(h.store, route.id, SyncStatus::Synced);
}

#[tokio::test]
async fn test_edit_during_upload_requeues_route() {
    let h = Harness::with_remote(
        InMemoryRemote::new().with_latency(Duration::from_millis(100)),
        test_config(),
    )
    .await;
    let route = h.add_route("draft", 0, 3).await;

    let engine = h.engine.clone();
    let run = tokio::spawn(async move { engine.run_sync().await });

    // wait until the upload has claimed the route
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let stored = h.store.get(route.id).await.unwrap().unwrap();
            if stored.sync_status == SyncStatus::Syncing {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("route never reached Syncing");

    let edit = RouteEdit {
        title: Some("final title".into()),
        ..RouteEdit::default()
    };
    h.store.edit_route(route.id, &edit).await.unwrap();

    let result = run.await.unwrap();
    assert_eq!(result.synced_count, 1);
    assert_status!(h.store, route.id, SyncStatus::Pending);

    // the next run ships the edit
    h.engine.run_sync().await;
    assert_status!(h.store, route.id, SyncStatus::Synced);
    let titles: Vec<String> = h.remote.routes().into_iter().map(|(_, header)| header.title).collect();
    assert_eq!(titles, vec!["final title".to_string()]);
}

#[tokio::test]
async fn test_delete_during_upload_removes_remote_copy() {
    let h = Harness::with_remote(
        InMemoryRemote::new().with_latency(Duration::from_millis(100)),
        test_config(),
    )
    .await;
    let route = h.add_route("abandoned", 0, 3).await;

    let engine = h.engine.clone();
    let run = tokio::spawn(async move { engine.run_sync().await });

    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let stored = h.store.get(route.id).await.unwrap().unwrap();
            if stored.sync_status == SyncStatus::Syncing {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("route never reached Syncing");
    assert!(h.store.delete(route.id).await.unwrap());

    let result = run.await.unwrap();

    assert!(h.store.get(route.id).await.unwrap().is_none());
    assert_eq!(result.deletions_completed, 1);
    assert_eq!(h.remote.route_count(), 0);
    assert!(h.store.list_pending_deletions().await.unwrap().is_empty());
    assert_eq!(h.store.count_pending().await.unwrap(), 0);
}

#[tokio::test]
async fn test_storage_failure_mid_upload_is_surfaced_and_requeued() {
    let h = Harness::new().await;
    let route = h.add_route("stuck", 0, 3).await;
    sqlx::query(
        "CREATE TRIGGER reject_progress BEFORE UPDATE OF uploaded_points ON routes
         BEGIN SELECT RAISE(ABORT, 'database disk image is malformed'); END",
    )
    .execute(h.store.pool())
    .await
    .unwrap();

    let result = h.engine.run_sync().await;

    assert_eq!(result.failed_count, 1);
    assert_eq!(result.synced_count, 0);
    assert_eq!(result.messages.len(), 1);
    assert!(result.messages[0].starts_with("stuck: storage error"));
    assert!(result.messages[0].contains("database disk image is malformed"));
    let stored = h.store.get(route.id).await.unwrap().unwrap();
    assert_eq!(stored.sync_status, SyncStatus::Pending);
    assert_eq!(stored.retry_count, 0);
    assert_eq!(stored.uploaded_points, 0);
}

#[tokio::test]
async fn test_expired_session_without_refresh_needs_reauth() {
    let h = Harness::new().await;
    let first = h.add_route("first", 0, 1).await;
    let second = h.add_route("second", 1, 1).await;
    h.remote
        .fail_next(CallKind::Upsert, SyncError::auth("HTTP_401", "JWT expired"));

    let result = h.engine.run_sync().await;

    assert!(result.needs_reauth);
    assert_eq!(result.attempted, 1);
    assert_eq!(result.failed_count, 0);
    assert_eq!(h.remote.refresh_count(), 1);

    let stored = h.store.get(first.id).await.unwrap().unwrap();
    assert_eq!(stored.sync_status, SyncStatus::Pending);
    assert_eq!(stored.retry_count, 0);
    assert_status!(h.store, second.id, SyncStatus::Pending);
    assert_eq!(h.engine.state().pending(), 2);
}

#[tokio::test]
async fn test_expired_session_is_refreshed_once() {
    let h = Harness::new().await;
    let route = h.add_route("walk", 0, 2).await;
    h.remote.set_refresh_succeeds(true);
    h.remote
        .fail_next(CallKind::Upsert, SyncError::auth("HTTP_401", "JWT expired"));

    let result = h.engine.run_sync().await;

    assert!(!result.needs_reauth);
    assert_eq!(result.synced_count, 1);
    assert_eq!(h.remote.refresh_count(), 1);
    assert_eq!(h.remote.count_calls(CallKind::Upsert), 2);
    assert_status!(h.store, route.id, SyncStatus::Synced);
}

#[tokio::test]
async fn test_slow_remote_call_times_out_as_network_failure() {
    let config = SyncConfig {
        call_timeout: Duration::from_millis(50),
        ..test_config()
    };
    let h = Harness::with_remote(InMemoryRemote::new().with_latency(Duration::from_millis(500)), config).await;
    let route = h.add_route("slow", 0, 1).await;

    let result = h.engine.run_sync().await;

    assert_eq!(result.failed_count, 1);
    let stored = h.store.get(route.id).await.unwrap().unwrap();
    assert_eq!(stored.sync_status, SyncStatus::Pending);
    assert_eq!(stored.retry_count, 1);
    assert_eq!(stored.last_error.as_deref(), Some("no response within 50 ms"));
}

#[tokio::test]
async fn test_deleting_a_synced_route_removes_it_remotely() {
    let h = Harness::new().await;
    let route = h.add_route("to delete", 0, 2).await;
    h.engine.run_sync().await;
    assert_eq!(h.remote.route_count(), 1);

    assert!(h.store.delete(route.id).await.unwrap());
    assert_eq!(h.store.count_pending().await.unwrap(), 1);

    let result = h.engine.run_sync().await;
    assert_eq!(result.deletions_attempted, 1);
    assert_eq!(result.deletions_completed, 1);
    assert_eq!(h.remote.route_count(), 0);
    assert_eq!(h.store.count_pending().await.unwrap(), 0);
}

#[tokio::test]
async fn test_remote_delete_gives_up_after_max_attempts() {
    let h = Harness::new().await;
    let route = h.add_route("stubborn", 0, 1).await;
    h.engine.run_sync().await;
    h.store.delete(route.id).await.unwrap();
    h.remote
        .fail_times(CallKind::Delete, 5, SyncError::network("UNREACHABLE", "connection refused"));

    for _ in 0..2 {
        let result = h.engine.run_sync().await;
        assert_eq!(result.deletions_completed, 0);
        assert_eq!(h.store.list_pending_deletions().await.unwrap().len(), 1);
    }

    let last = h.engine.run_sync().await;
    assert!(last.messages.iter().any(|m| m.starts_with("gave up deleting remote route")));
    assert!(h.store.list_pending_deletions().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_status_summary_reports_reauth() {
    let h = Harness::new().await;
    h.add_route("walk", 0, 1).await;
    h.remote
        .fail_next(CallKind::Upsert, SyncError::auth("HTTP_403", "forbidden"));
    let service = SyncService::new(
        Arc::clone(&h.store),
        h.remote.clone(),
        instant_monitor(NetworkStatus::Online),
        test_config(),
    );

    service.sync_now().await;
    let status = service.status();

    assert!(status.needs_reauth);
    assert_eq!(status.pending, 1);
    assert_eq!(status.network, NetworkStatus::Online);
    assert!(!status.is_syncing);
}

#[tokio::test]
async fn test_recording_route_is_not_synced_until_finished() {
    let h = Harness::new().await;
    let mut route = route_at("live", epoch(), 2);
    route.recording = true;
    h.store.create(&route).await.unwrap();

    let result = h.engine.run_sync().await;
    assert_eq!(result.attempted, 0);
    assert_eq!(h.store.count_pending().await.unwrap(), 0);

    h.store.finish_recording(route.id, 22.2, 5).await.unwrap();
    let result = h.engine.run_sync().await;
    assert_eq!(result.synced_count, 1);
}
