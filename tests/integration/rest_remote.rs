//! REST remote against a mock PostgREST server

use crate::common::{epoch, memory_store, route_at, test_config};
use crate::assert_ok;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::sync::Arc;
use trailsync::remote::{RemoteRouteStore, RestRouteStore, RouteHeader};
use trailsync::shared::config::RemoteConfig;
use trailsync::shared::{ErrorKind, SyncStatus};
use trailsync::sync::SyncEngine;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

fn remote_for(server: &MockServer) -> RestRouteStore {
    let config = RemoteConfig {
        base_url: server.uri(),
        api_key: Some("anon-key".to_string()),
        access_token: Some("session-jwt".to_string()),
        ..RemoteConfig::default()
    };
    RestRouteStore::new(&config).expect("Failed to build REST store")
}

fn prefer_header(request: &Request) -> Option<&str> {
    request.headers.get("prefer").and_then(|value| value.to_str().ok())
}

#[tokio::test]
async fn test_upsert_sends_headers_and_reads_id() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/routes"))
        .and(query_param("on_conflict", "id"))
        .and(header("apikey", "anon-key"))
        .and(header("authorization", "Bearer session-jwt"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([{ "id": "remote-7" }])))
        .expect(1)
        .mount(&server)
        .await;

    let remote = remote_for(&server);
    let route = route_at("lake", epoch(), 2);
    let remote_id = assert_ok!(remote.upsert_route(&RouteHeader::from(&route)).await);
    assert_eq!(remote_id, "remote-7");

    let requests = server.received_requests().await.unwrap();
    assert_eq!(
        prefer_header(&requests[0]),
        Some("resolution=merge-duplicates,return=representation")
    );
    let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["id"], json!(route.id.to_string()));
    assert_eq!(body["user_id"], json!("user-1"));
    assert_eq!(body["title"], json!("lake"));
}

#[tokio::test]
async fn test_insert_points_uses_ignore_duplicates() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/route_points"))
        .and(query_param("on_conflict", "route_id,sequence_number"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let remote = remote_for(&server);
    let route = route_at("hill", epoch(), 3);
    assert_ok!(remote.insert_points("remote-7", &route.points).await);

    let requests = server.received_requests().await.unwrap();
    assert_eq!(prefer_header(&requests[0]), Some("resolution=ignore-duplicates,return=minimal"));
    let rows: Vec<Value> = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[2]["route_id"], json!("remote-7"));
    assert_eq!(rows[2]["sequence_number"], json!(2));
}

#[tokio::test]
async fn test_error_statuses_are_classified() {
    let cases = [
        (401, json!({ "message": "JWT expired" }), ErrorKind::Auth),
        (409, json!({ "message": "conflict" }), ErrorKind::Conflict),
        (503, json!({ "message": "unavailable" }), ErrorKind::Network),
        (422, json!({ "message": "bad geometry" }), ErrorKind::Validation),
        (400, json!({ "code": "23505", "message": "duplicate key" }), ErrorKind::Conflict),
    ];

    for (status, body, kind) in cases {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/routes"))
            .respond_with(ResponseTemplate::new(status).set_body_json(body))
            .mount(&server)
            .await;

        let remote = remote_for(&server);
        let route_header = RouteHeader::from(&route_at("x", epoch(), 0));
        let error = remote.upsert_route(&route_header).await.unwrap_err();
        assert_eq!(error.kind(), kind, "status {}", status);
    }
}

#[tokio::test]
async fn test_validation_message_is_verbatim() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/routes"))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(json!({ "code": "23514", "message": "distance must be positive" })),
        )
        .mount(&server)
        .await;

    let remote = remote_for(&server);
    let error = remote
        .upsert_route(&RouteHeader::from(&route_at("x", epoch(), 0)))
        .await
        .unwrap_err();
    assert_eq!(error.to_string(), "distance must be positive");
}

#[tokio::test]
async fn test_delete_of_missing_route_succeeds() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/rest/v1/routes"))
        .and(query_param("id", "eq.gone"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let remote = remote_for(&server);
    assert_ok!(remote.delete_route("gone").await);
}

#[tokio::test]
async fn test_unreachable_host_is_network_error() {
    let config = RemoteConfig {
        base_url: "http://127.0.0.1:9".to_string(),
        ..RemoteConfig::default()
    };
    let remote = RestRouteStore::new(&config).unwrap();
    let error = remote.delete_route("any").await.unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Network);
}

#[tokio::test]
async fn test_engine_syncs_through_rest_remote() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/routes"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([{ "id": "remote-1" }])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/route_points"))
        .respond_with(ResponseTemplate::new(201))
        .expect(2)
        .mount(&server)
        .await;

    let store = memory_store().await;
    let route = route_at("river", epoch(), 15);
    store.create(&route).await.unwrap();
    let engine = SyncEngine::new(Arc::clone(&store), Arc::new(remote_for(&server)), test_config());

    let result = engine.run_sync().await;

    assert_eq!(result.synced_count, 1);
    let stored = store.get(route.id).await.unwrap().unwrap();
    assert_eq!(stored.sync_status, SyncStatus::Synced);
    assert_eq!(stored.remote_id.as_deref(), Some("remote-1"));
    assert_eq!(stored.uploaded_points, 15);
}
