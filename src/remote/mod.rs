//! # Remote Route Store
//!
//! The minimal contract the sync engine needs from the backend: upsert a
//! route header, insert point batches, delete a route, and optionally
//! refresh an expired session.
//!
//! ## Key Components
//!
//! - `rest.rs`: PostgREST/Supabase-style HTTP implementation (reqwest)
//! - `memory.rs`: in-process implementation with scripted failures
//!
//! All failures are reported through the closed [`SyncError`] taxonomy so
//! the engine can classify them without knowing the transport.

pub mod memory;
pub mod rest;

pub use memory::{CallKind, InMemoryRemote, RemoteCall};
pub use rest::{RestRouteStore, SessionProvider, StaticSession};

use crate::shared::route::{Route, RoutePoint};
use crate::shared::SyncError;
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};

/// Remote collaborator used by the sync engine
///
/// Implementations must be idempotent: upserting a known route or inserting
/// an already stored point is either a no-op or a `Conflict`.
pub trait RemoteRouteStore: Send + Sync {
    /// Create or update the route row, returning the remote identifier
    fn upsert_route<'a>(&'a self, header: &'a RouteHeader) -> BoxFuture<'a, Result<String, SyncError>>;

    /// Store a batch of points under an uploaded route
    fn insert_points<'a>(
        &'a self,
        remote_id: &'a str,
        points: &'a [RoutePoint],
    ) -> BoxFuture<'a, Result<(), SyncError>>;

    /// Remove an uploaded route
    fn delete_route<'a>(&'a self, remote_id: &'a str) -> BoxFuture<'a, Result<(), SyncError>>;

    /// Try to renew an expired session; true if calls may be retried
    fn refresh_session(&self) -> BoxFuture<'_, bool> {
        Box::pin(async { false })
    }
}

/// Route row as sent to the remote store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteHeader {
    /// Local UUID, used as the remote primary key so upserts are idempotent
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub description: String,
    /// Meters
    pub distance: f64,
    /// Seconds
    pub duration: i64,
    pub is_public: bool,
    pub created_at: DateTime<Utc>,
}

impl From<&Route> for RouteHeader {
    fn from(route: &Route) -> Self {
        Self {
            id: route.id.to_string(),
            user_id: route.owner_id.clone(),
            title: route.title.clone(),
            description: route.description.clone(),
            distance: route.distance_m,
            duration: route.duration_s,
            is_public: route.is_public,
            created_at: route.created_at,
        }
    }
}

/// Point row as sent to the remote store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointRow {
    pub route_id: String,
    pub sequence_number: i64,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl PointRow {
    pub fn new(route_id: &str, point: &RoutePoint) -> Self {
        Self {
            route_id: route_id.to_string(),
            sequence_number: point.sequence,
            latitude: point.latitude,
            longitude: point.longitude,
            altitude: point.altitude,
            timestamp: point.timestamp,
        }
    }
}
