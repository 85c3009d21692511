//! # Route Operations
//!
//! Creation, trace appends, user edits and deletion of routes.
//!
//! ## Local edits
//!
//! Appending to a finished route or editing its header counts as a local
//! edit: a `Synced` route goes back to `Pending`, a `Syncing` route is only
//! flagged so the in-flight attempt ends in `Pending` instead of `Synced`.
//! `Failed` routes stay failed until [`LocalRouteStore::retry_failed`].

use super::{
    encode_ts, load_route, parse_uuid, point_from_row, route_from_row, LocalRouteStore, Result,
    StoreError, ROUTE_COLUMNS,
};
use crate::shared::route::{Route, RouteEdit, RoutePoint, SyncStatus};
use chrono::Utc;
use sqlx::sqlite::SqliteConnection;
use sqlx::Row;
use std::collections::HashMap;
use uuid::Uuid;

/// Applies local-edit semantics to one route; all CASE arms see the old row
const MARK_EDITED_SQL: &str = "UPDATE routes SET
        sync_status = CASE sync_status WHEN 'synced' THEN 'pending' ELSE sync_status END,
        retry_count = CASE sync_status WHEN 'synced' THEN 0 ELSE retry_count END,
        next_retry_at = CASE sync_status WHEN 'synced' THEN NULL ELSE next_retry_at END,
        edited_during_sync = CASE sync_status WHEN 'syncing' THEN 1 ELSE edited_during_sync END,
        updated_at = ?
     WHERE id = ?";

impl LocalRouteStore {
    /// Store a new route together with its initial points
    pub async fn create(&self, route: &Route) -> Result<()> {
        check_sequence(route.id, None, &route.points)?;
        let _guard = self.lock_route(route.id).await;

        let mut tx = self.pool().begin().await?;
        let inserted = sqlx::query(
            "INSERT INTO routes (
                id, remote_id, owner_id, title, description, distance_m, duration_s,
                is_public, created_at, updated_at, sync_status, retry_count, last_error,
                next_retry_at, recording, uploaded_points, edited_during_sync
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0)",
        )
        .bind(route.id.to_string())
        .bind(&route.remote_id)
        .bind(&route.owner_id)
        .bind(&route.title)
        .bind(&route.description)
        .bind(route.distance_m)
        .bind(route.duration_s)
        .bind(route.is_public)
        .bind(encode_ts(&route.created_at))
        .bind(encode_ts(&route.updated_at))
        .bind(route.sync_status.as_str())
        .bind(route.retry_count as i64)
        .bind(&route.last_error)
        .bind(route.next_retry_at.as_ref().map(encode_ts))
        .bind(route.recording)
        .bind(route.uploaded_points as i64)
        .execute(&mut *tx)
        .await;

        match inserted {
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                return Err(StoreError::AlreadyExists(route.id));
            }
            other => {
                other?;
            }
        }

        insert_points(&mut tx, route.id, &route.points).await?;
        tx.commit().await?;

        tracing::debug!(
            "Created route {} ({} points, recording={})",
            route.id,
            route.points.len(),
            route.recording
        );
        Ok(())
    }

    /// Load one route with its full trace
    pub async fn get(&self, route_id: Uuid) -> Result<Option<Route>> {
        let mut conn = self.pool().acquire().await?;
        load_route(&mut conn, route_id).await
    }

    /// All routes with points, oldest first
    pub async fn list_routes(&self) -> Result<Vec<Route>> {
        let mut conn = self.pool().acquire().await?;

        let point_rows = sqlx::query(
            "SELECT route_id, seq, latitude, longitude, altitude, captured_at
             FROM route_points ORDER BY route_id, seq",
        )
        .fetch_all(&mut *conn)
        .await?;

        let mut points: HashMap<Uuid, Vec<RoutePoint>> = HashMap::new();
        for row in &point_rows {
            let route_id = parse_uuid(&row.try_get::<String, _>("route_id")?)?;
            points.entry(route_id).or_default().push(point_from_row(row)?);
        }

        let route_rows = sqlx::query(&format!(
            "SELECT {} FROM routes ORDER BY created_at, rowid",
            ROUTE_COLUMNS
        ))
        .fetch_all(&mut *conn)
        .await?;

        route_rows
            .iter()
            .map(|row| {
                let route_id = parse_uuid(&row.try_get::<String, _>("id")?)?;
                route_from_row(row, points.remove(&route_id).unwrap_or_default())
            })
            .collect()
    }

    /// Append points to the end of a route's trace
    ///
    /// The batch must continue the stored sequence strictly. Any violation
    /// rejects the whole batch and nothing is written.
    pub async fn append_points(&self, route_id: Uuid, points: &[RoutePoint]) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }
        let _guard = self.lock_route(route_id).await;

        let mut tx = self.pool().begin().await?;
        let row = sqlx::query(
            "SELECT r.recording, (SELECT MAX(seq) FROM route_points WHERE route_id = r.id) AS last_seq
             FROM routes r WHERE r.id = ?",
        )
        .bind(route_id.to_string())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::NotFound(route_id))?;

        let recording: bool = row.try_get("recording")?;
        let last_seq: Option<i64> = row.try_get("last_seq")?;
        check_sequence(route_id, last_seq, points)?;

        insert_points(&mut tx, route_id, points).await?;
        if recording {
            sqlx::query("UPDATE routes SET updated_at = ? WHERE id = ?")
                .bind(encode_ts(&Utc::now()))
                .bind(route_id.to_string())
                .execute(&mut *tx)
                .await?;
        } else {
            mark_edited(&mut tx, route_id).await?;
        }
        tx.commit().await?;

        tracing::trace!("Appended {} points to route {}", points.len(), route_id);
        Ok(())
    }

    /// Apply a header edit and return the updated route
    pub async fn edit_route(&self, route_id: Uuid, edit: &RouteEdit) -> Result<Route> {
        let _guard = self.lock_route(route_id).await;

        let mut tx = self.pool().begin().await?;
        if !edit.is_empty() {
            let updated = sqlx::query(
                "UPDATE routes SET
                    title = COALESCE(?, title),
                    description = COALESCE(?, description),
                    is_public = COALESCE(?, is_public)
                 WHERE id = ?",
            )
            .bind(&edit.title)
            .bind(&edit.description)
            .bind(edit.is_public)
            .bind(route_id.to_string())
            .execute(&mut *tx)
            .await?;
            if updated.rows_affected() == 0 {
                return Err(StoreError::NotFound(route_id));
            }
            mark_edited(&mut tx, route_id).await?;
        }
        let route = load_route(&mut tx, route_id)
            .await?
            .ok_or(StoreError::NotFound(route_id))?;
        tx.commit().await?;

        tracing::debug!("Edited route {} (status now {})", route_id, route.sync_status);
        Ok(route)
    }

    /// Close a recording and hand the route to the sync engine
    pub async fn finish_recording(&self, route_id: Uuid, distance_m: f64, duration_s: i64) -> Result<()> {
        let _guard = self.lock_route(route_id).await;

        let result = sqlx::query(
            "UPDATE routes SET recording = 0, distance_m = ?, duration_s = ?,
                    sync_status = 'pending', updated_at = ?
             WHERE id = ? AND recording = 1",
        )
        .bind(distance_m)
        .bind(duration_s)
        .bind(encode_ts(&Utc::now()))
        .bind(route_id.to_string())
        .execute(self.pool())
        .await?;

        if result.rows_affected() == 0 && !self.exists(route_id).await? {
            return Err(StoreError::NotFound(route_id));
        }
        Ok(())
    }

    /// Overwrite a route's status and last error
    pub async fn update_status(&self, route_id: Uuid, status: SyncStatus, error: Option<&str>) -> Result<()> {
        let _guard = self.lock_route(route_id).await;

        let result = sqlx::query("UPDATE routes SET sync_status = ?, last_error = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(error)
            .bind(route_id.to_string())
            .execute(self.pool())
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(route_id));
        }
        Ok(())
    }

    /// Delete a route locally, queueing a remote delete if it was uploaded
    ///
    /// Returns false when the route did not exist.
    pub async fn delete(&self, route_id: Uuid) -> Result<bool> {
        let _guard = self.lock_route(route_id).await;

        let mut tx = self.pool().begin().await?;
        let remote_id: Option<Option<String>> = sqlx::query_scalar("SELECT remote_id FROM routes WHERE id = ?")
            .bind(route_id.to_string())
            .fetch_optional(&mut *tx)
            .await?;

        let Some(remote_id) = remote_id else {
            return Ok(false);
        };

        sqlx::query("DELETE FROM routes WHERE id = ?")
            .bind(route_id.to_string())
            .execute(&mut *tx)
            .await?;
        if let Some(remote_id) = &remote_id {
            super::sync::queue_deletion(&mut tx, remote_id).await?;
        }
        tx.commit().await?;

        tracing::info!(
            "Deleted route {}{}",
            route_id,
            if remote_id.is_some() { " (remote delete queued)" } else { "" }
        );
        Ok(true)
    }

    /// Explicit user retry of a failed route
    ///
    /// Returns false when the route exists but is not `Failed`.
    pub async fn retry_failed(&self, route_id: Uuid) -> Result<bool> {
        let _guard = self.lock_route(route_id).await;

        let result = sqlx::query(
            "UPDATE routes SET sync_status = 'pending', retry_count = 0,
                    next_retry_at = NULL, last_error = NULL
             WHERE id = ? AND sync_status = 'failed'",
        )
        .bind(route_id.to_string())
        .execute(self.pool())
        .await?;

        if result.rows_affected() == 0 {
            if !self.exists(route_id).await? {
                return Err(StoreError::NotFound(route_id));
            }
            return Ok(false);
        }
        tracing::info!("Route {} queued for another sync attempt", route_id);
        Ok(true)
    }

    async fn exists(&self, route_id: Uuid) -> Result<bool> {
        let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM routes WHERE id = ?")
            .bind(route_id.to_string())
            .fetch_optional(self.pool())
            .await?;
        Ok(found.is_some())
    }
}

/// Points must be strictly increasing and continue after `previous`
fn check_sequence(route_id: Uuid, previous: Option<i64>, points: &[RoutePoint]) -> Result<()> {
    let mut last = previous;
    for point in points {
        if let Some(prev) = last {
            if point.sequence <= prev {
                return Err(StoreError::InvalidSequence {
                    route_id,
                    sequence: point.sequence,
                    previous: last,
                });
            }
        }
        last = Some(point.sequence);
    }
    Ok(())
}

async fn insert_points(conn: &mut SqliteConnection, route_id: Uuid, points: &[RoutePoint]) -> Result<()> {
    let id = route_id.to_string();
    for point in points {
        sqlx::query(
            "INSERT INTO route_points (route_id, seq, latitude, longitude, altitude, captured_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(point.sequence)
        .bind(point.latitude)
        .bind(point.longitude)
        .bind(point.altitude)
        .bind(encode_ts(&point.timestamp))
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

async fn mark_edited(conn: &mut SqliteConnection, route_id: Uuid) -> Result<()> {
    sqlx::query(MARK_EDITED_SQL)
        .bind(encode_ts(&Utc::now()))
        .bind(route_id.to_string())
        .execute(&mut *conn)
        .await?;
    Ok(())
}
