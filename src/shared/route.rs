//! Route Data Structures
//!
//! A `Route` is one recorded walk: a header (owner, title, distance, ...),
//! an append-only sequence of `RoutePoint`s and the sync bookkeeping the
//! engine needs to move it to the remote store.
//!
//! # Sync status lifecycle
//!
//! ```text
//! Pending --> Syncing --> Synced
//!                    \--> Pending (retry scheduled)
//!                    \--> Failed  (permanent, or retries exhausted)
//! ```
//!
//! `Synced` only goes back to `Pending` when the route is edited locally.

use crate::shared::geo;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Synchronization state of a single route
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Recorded locally, not yet confirmed remotely
    Pending,
    /// An upload attempt is in flight
    Syncing,
    /// Confirmed stored remotely
    Synced,
    /// Gave up; needs an explicit user retry
    Failed,
}

impl SyncStatus {
    /// Column value used by the local store
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Syncing => "syncing",
            SyncStatus::Synced => "synced",
            SyncStatus::Failed => "failed",
        }
    }

    /// Parse a stored column value
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(SyncStatus::Pending),
            "syncing" => Some(SyncStatus::Syncing),
            "synced" => Some(SyncStatus::Synced),
            "failed" => Some(SyncStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One GPS fix within a route
///
/// Points are immutable once appended. `sequence` is unique and strictly
/// increasing within its route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutePoint {
    /// Position in the route's capture order
    pub sequence: i64,
    /// Latitude in degrees
    pub latitude: f64,
    /// Longitude in degrees
    pub longitude: f64,
    /// Altitude in meters, when the fix had one
    pub altitude: Option<f64>,
    /// Capture time
    pub timestamp: DateTime<Utc>,
}

impl RoutePoint {
    pub fn new(
        sequence: i64,
        latitude: f64,
        longitude: f64,
        altitude: Option<f64>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            sequence,
            latitude,
            longitude,
            altitude,
            timestamp,
        }
    }
}

/// A recorded walking route
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    /// Local identifier, also used as the remote primary key
    pub id: Uuid,
    /// Identifier assigned by the remote store once the header is accepted
    pub remote_id: Option<String>,
    /// Owner of the route
    pub owner_id: String,
    pub title: String,
    pub description: String,
    /// Total length in meters
    pub distance_m: f64,
    /// Total duration in seconds
    pub duration_s: i64,
    pub is_public: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Full-resolution trace ordered by sequence number
    pub points: Vec<RoutePoint>,
    pub sync_status: SyncStatus,
    /// Consecutive retryable failures since the last success
    pub retry_count: u32,
    pub last_error: Option<String>,
    /// Earliest time the engine may pick the route up again
    pub next_retry_at: Option<DateTime<Utc>>,
    /// True while capture is still appending points
    pub recording: bool,
    /// Number of leading points the remote has confirmed
    pub uploaded_points: usize,
    /// A local edit landed while an upload was in flight
    pub edited_during_sync: bool,
}

impl Route {
    /// Create a new pending route with no points
    pub fn new(owner_id: impl Into<String>, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            remote_id: None,
            owner_id: owner_id.into(),
            title: title.into(),
            description: String::new(),
            distance_m: 0.0,
            duration_s: 0,
            is_public: true,
            created_at: now,
            updated_at: now,
            points: Vec::new(),
            sync_status: SyncStatus::Pending,
            retry_count: 0,
            last_error: None,
            next_retry_at: None,
            recording: false,
            uploaded_points: 0,
            edited_during_sync: false,
        }
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Override the creation time (imports keep their original timestamp)
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self.updated_at = created_at;
        self
    }

    /// Attach an imported trace and derive distance and duration from it
    pub fn with_points(mut self, points: Vec<RoutePoint>) -> Self {
        self.points = points;
        self.recompute_totals();
        self
    }

    /// Recompute `distance_m` and `duration_s` from the trace
    pub fn recompute_totals(&mut self) {
        self.distance_m = geo::path_length(&self.points);
        self.duration_s = match (self.points.first(), self.points.last()) {
            (Some(first), Some(last)) => (last.timestamp - first.timestamp).num_seconds().max(0),
            _ => 0,
        };
    }

    /// First point of the trace
    pub fn start_point(&self) -> Option<&RoutePoint> {
        self.points.first()
    }

    /// Highest sequence number stored for this route
    pub fn last_sequence(&self) -> Option<i64> {
        self.points.last().map(|p| p.sequence)
    }

    /// Whether the engine may attempt the route at `now`
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.sync_status == SyncStatus::Pending
            && !self.recording
            && self.next_retry_at.map_or(true, |at| at <= now)
    }

    /// Points the remote has not confirmed yet
    pub fn unsent_points(&self) -> &[RoutePoint] {
        let start = self.uploaded_points.min(self.points.len());
        &self.points[start..]
    }
}

/// A user edit to a route's header fields
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RouteEdit {
    pub title: Option<String>,
    pub description: Option<String>,
    pub is_public: Option<bool>,
}

impl RouteEdit {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.description.is_none() && self.is_public.is_none()
    }
}
