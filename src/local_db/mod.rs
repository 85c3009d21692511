//! # Local Route Store
//!
//! Durable on-device storage for routes, their point sequences and the sync
//! bookkeeping that drives the engine. Backed by SQLite through sqlx.
//!
//! ## Guarantees
//!
//! - **Durable writes**: every mutation commits (WAL, `synchronous=FULL`)
//!   before the call returns
//! - **Per-route exclusion**: writers to the same route are serialized by an
//!   async mutex; different routes proceed concurrently
//! - **Append-only traces**: point batches must continue the route's
//!   sequence strictly, and are rejected whole otherwise
//! - **Restart safe**: the on-disk layout is reloaded as-is and pending work
//!   resumes; interrupted uploads are recovered with
//!   [`LocalRouteStore::recover_interrupted`]
//!
//! ## Key Components
//!
//! - `schema.rs`: schema file and numbered migrations
//! - `routes.rs`: route creation, trace appends, edits and deletion
//! - `sync.rs`: pending queries and the sync engine's state transitions
//!
//! ## Usage
//!
//! ```rust,ignore
//! use trailsync::local_db::LocalRouteStore;
//!
//! let store = LocalRouteStore::open(&config.db_path()).await?;
//! store.create(&route).await?;
//! let unsynced = store.count_pending().await?;
//! ```

pub mod routes;
pub mod schema;
pub mod sync;

pub use sync::{CompletionOutcome, PendingDeletion};

use crate::shared::route::{Route, RoutePoint, SyncStatus};
use crate::shared::SyncError;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePoolOptions, SqliteRow,
    SqliteSynchronous,
};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// Result type for local store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Local store failures
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("route {0} not found")]
    NotFound(Uuid),

    #[error("route {0} already exists")]
    AlreadyExists(Uuid),

    #[error("route {route_id}: sequence {sequence} does not follow {previous:?}")]
    InvalidSequence {
        route_id: Uuid,
        sequence: i64,
        previous: Option<i64>,
    },

    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("background task failed: {0}")]
    Task(String),
}

impl StoreError {
    /// Whether repeating the same operation might succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Database(_) | StoreError::Io(_))
    }
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        let code = match &err {
            StoreError::Database(_) => "SQLITE",
            StoreError::Io(_) => "IO",
            StoreError::NotFound(_) => "NOT_FOUND",
            StoreError::AlreadyExists(_) => "ALREADY_EXISTS",
            StoreError::InvalidSequence { .. } => "INVALID_SEQUENCE",
            StoreError::Corrupt(_) => "CORRUPT",
            StoreError::Task(_) => "TASK",
        };
        SyncError::storage(code, err.to_string())
    }
}

/// Held while writing one route
///
/// The lock entry is dropped from the map once nobody holds or waits on it.
pub(crate) struct RouteGuard<'a> {
    locks: &'a StdMutex<HashMap<Uuid, Arc<Mutex<()>>>>,
    route_id: Uuid,
    lock: Arc<Mutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for RouteGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        // the map and this guard are the only owners left
        if Arc::strong_count(&self.lock) == 2 {
            locks.remove(&self.route_id);
        }
    }
}

/// Durable route store
///
/// Construct once per session and share it behind an `Arc`.
#[derive(Debug)]
pub struct LocalRouteStore {
    pool: SqlitePool,
    route_locks: StdMutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl LocalRouteStore {
    /// Open or create the database file at `path`
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        tracing::info!("Opened route store at {}", path.display());
        Self::with_pool(pool).await
    }

    /// Open a private in-memory database (tests, previews)
    pub async fn open_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

        // One connection that never expires: each in-memory connection is its own database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self> {
        let store = Self {
            pool,
            route_locks: StdMutex::new(HashMap::new()),
        };
        store.init_schema().await?;
        Ok(store)
    }

    /// Create tables and apply pending migrations
    async fn init_schema(&self) -> Result<()> {
        sqlx::raw_sql(schema::SCHEMA_SQL).execute(&self.pool).await?;
        self.run_migrations().await
    }

    async fn run_migrations(&self) -> Result<()> {
        let applied: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(version), 0) FROM schema_migrations")
            .fetch_one(&self.pool)
            .await?;

        for migration in schema::pending_migrations(applied) {
            let mut tx = self.pool.begin().await?;
            for statement in migration.statements {
                sqlx::query(statement).execute(&mut *tx).await?;
            }
            sqlx::query("INSERT INTO schema_migrations (version, applied_at) VALUES (?, ?)")
                .bind(migration.version)
                .bind(encode_ts(&Utc::now()))
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            tracing::info!(
                "Applied schema migration {} ({})",
                migration.version,
                migration.description
            );
        }

        Ok(())
    }

    /// Applied schema version
    pub async fn schema_version(&self) -> Result<i64> {
        Ok(sqlx::query_scalar("SELECT COALESCE(MAX(version), 0) FROM schema_migrations")
            .fetch_one(&self.pool)
            .await?)
    }

    /// Connection pool reference
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close every pooled connection
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Serialize writers of one route
    pub(crate) async fn lock_route(&self, route_id: Uuid) -> RouteGuard<'_> {
        let lock = {
            let mut locks = self.route_locks.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(locks.entry(route_id).or_default())
        };
        let guard = Arc::clone(&lock).lock_owned().await;
        RouteGuard {
            locks: &self.route_locks,
            route_id,
            lock,
            guard: Some(guard),
        }
    }

    /// Routes with a live lock entry
    pub(crate) fn locked_route_count(&self) -> usize {
        self.route_locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Per-status counts for diagnostics
    pub async fn stats(&self) -> Result<StoreStats> {
        let rows = sqlx::query(
            "SELECT sync_status, recording, COUNT(*) AS n FROM routes GROUP BY sync_status, recording",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut stats = StoreStats::default();
        for row in rows {
            let status: String = row.try_get("sync_status")?;
            let recording: bool = row.try_get("recording")?;
            let n = row.try_get::<i64, _>("n")? as u64;
            if recording {
                stats.recording += n;
                continue;
            }
            match SyncStatus::parse(&status) {
                Some(SyncStatus::Pending) => stats.pending += n,
                Some(SyncStatus::Syncing) => stats.syncing += n,
                Some(SyncStatus::Synced) => stats.synced += n,
                Some(SyncStatus::Failed) => stats.failed += n,
                None => return Err(StoreError::Corrupt(format!("unknown sync status '{}'", status))),
            }
        }

        let deletions: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pending_deletions")
            .fetch_one(&self.pool)
            .await?;
        stats.pending_deletions = deletions as u64;

        Ok(stats)
    }
}

/// Store statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub pending: u64,
    pub syncing: u64,
    pub synced: u64,
    pub failed: u64,
    /// Routes still being captured, whatever their status
    pub recording: u64,
    pub pending_deletions: u64,
}

/// Fixed-width RFC 3339 so stored timestamps compare lexicographically
pub(crate) fn encode_ts(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn decode_ts(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("bad timestamp '{}': {}", value, e)))
}

pub(crate) const ROUTE_COLUMNS: &str = "id, remote_id, owner_id, title, description, distance_m, \
     duration_s, is_public, created_at, updated_at, sync_status, retry_count, last_error, \
     next_retry_at, recording, uploaded_points, edited_during_sync";

pub(crate) fn route_from_row(row: &SqliteRow, points: Vec<RoutePoint>) -> Result<Route> {
    let id: String = row.try_get("id")?;
    let status: String = row.try_get("sync_status")?;
    let next_retry_at: Option<String> = row.try_get("next_retry_at")?;

    Ok(Route {
        id: parse_uuid(&id)?,
        remote_id: row.try_get("remote_id")?,
        owner_id: row.try_get("owner_id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        distance_m: row.try_get("distance_m")?,
        duration_s: row.try_get("duration_s")?,
        is_public: row.try_get("is_public")?,
        created_at: decode_ts(&row.try_get::<String, _>("created_at")?)?,
        updated_at: decode_ts(&row.try_get::<String, _>("updated_at")?)?,
        points,
        sync_status: SyncStatus::parse(&status)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown sync status '{}'", status)))?,
        retry_count: row.try_get::<i64, _>("retry_count")?.clamp(0, u32::MAX as i64) as u32,
        last_error: row.try_get("last_error")?,
        next_retry_at: next_retry_at.as_deref().map(decode_ts).transpose()?,
        recording: row.try_get("recording")?,
        uploaded_points: row.try_get::<i64, _>("uploaded_points")?.max(0) as usize,
        edited_during_sync: row.try_get("edited_during_sync")?,
    })
}

pub(crate) fn point_from_row(row: &SqliteRow) -> Result<RoutePoint> {
    Ok(RoutePoint {
        sequence: row.try_get("seq")?,
        latitude: row.try_get("latitude")?,
        longitude: row.try_get("longitude")?,
        altitude: row.try_get("altitude")?,
        timestamp: decode_ts(&row.try_get::<String, _>("captured_at")?)?,
    })
}

pub(crate) fn parse_uuid(value: &str) -> Result<Uuid> {
    Uuid::parse_str(value).map_err(|e| StoreError::Corrupt(format!("bad route id '{}': {}", value, e)))
}

pub(crate) async fn load_points(conn: &mut SqliteConnection, route_id: Uuid) -> Result<Vec<RoutePoint>> {
    let rows = sqlx::query(
        "SELECT seq, latitude, longitude, altitude, captured_at
         FROM route_points WHERE route_id = ? ORDER BY seq ASC",
    )
    .bind(route_id.to_string())
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(point_from_row).collect()
}

pub(crate) async fn load_route(conn: &mut SqliteConnection, route_id: Uuid) -> Result<Option<Route>> {
    let row = sqlx::query(&format!("SELECT {} FROM routes WHERE id = ?", ROUTE_COLUMNS))
        .bind(route_id.to_string())
        .fetch_optional(&mut *conn)
        .await?;

    match row {
        Some(row) => {
            let points = load_points(conn, route_id).await?;
            Ok(Some(route_from_row(&row, points)?))
        }
        None => Ok(None),
    }
}
