//! # Sync Bookkeeping
//!
//! Queries and state transitions used by the sync engine. The pending queue
//! is not a separate table: it is the set of `pending`, non-recording routes
//! whose backoff has elapsed, oldest first.
//!
//! Every transition that ends an attempt checks `edited_during_sync`; an
//! edited route always lands back in `Pending` with a fresh retry budget.

use super::{encode_ts, decode_ts, load_points, route_from_row, LocalRouteStore, Result, StoreError, ROUTE_COLUMNS};
use crate::shared::route::Route;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteConnection;
use sqlx::Row;
use uuid::Uuid;

/// How an upload attempt was recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionOutcome {
    /// Route is now `Synced`
    Synced,
    /// Route was edited mid-flight and is `Pending` again
    Requeued,
    /// Route was deleted locally while the upload ran
    Missing,
}

/// A remote delete waiting for connectivity
#[derive(Debug, Clone, PartialEq)]
pub struct PendingDeletion {
    pub remote_id: String,
    pub queued_at: DateTime<Utc>,
    pub retry_count: u32,
    pub last_error: Option<String>,
}

impl LocalRouteStore {
    /// Routes due for upload now
    pub async fn list_pending(&self) -> Result<Vec<Route>> {
        self.list_pending_at(Utc::now()).await
    }

    /// Routes due for upload at `now`, oldest first
    pub async fn list_pending_at(&self, now: DateTime<Utc>) -> Result<Vec<Route>> {
        let mut conn = self.pool().acquire().await?;

        let rows = sqlx::query(&format!(
            "SELECT {} FROM routes
             WHERE sync_status = 'pending' AND recording = 0
               AND (next_retry_at IS NULL OR next_retry_at <= ?)
             ORDER BY created_at, rowid",
            ROUTE_COLUMNS
        ))
        .bind(encode_ts(&now))
        .fetch_all(&mut *conn)
        .await?;

        let mut routes = Vec::with_capacity(rows.len());
        for row in &rows {
            let id = super::parse_uuid(&row.try_get::<String, _>("id")?)?;
            let points = load_points(&mut conn, id).await?;
            routes.push(route_from_row(row, points)?);
        }
        Ok(routes)
    }

    /// Unsynced items shown to the user
    ///
    /// Finished routes that are not `Synced` plus queued remote deletes.
    pub async fn count_pending(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT
                (SELECT COUNT(*) FROM routes WHERE sync_status != 'synced' AND recording = 0)
              + (SELECT COUNT(*) FROM pending_deletions)",
        )
        .fetch_one(self.pool())
        .await?;
        Ok(count.max(0) as u64)
    }

    /// Earliest `next_retry_at` among routes waiting out a backoff
    pub async fn next_retry_due(&self) -> Result<Option<DateTime<Utc>>> {
        let earliest: Option<String> = sqlx::query_scalar(
            "SELECT MIN(next_retry_at) FROM routes
             WHERE sync_status = 'pending' AND recording = 0 AND next_retry_at IS NOT NULL",
        )
        .fetch_one(self.pool())
        .await?;
        earliest.as_deref().map(decode_ts).transpose()
    }

    /// Claim a pending route for upload
    ///
    /// Returns `None` if the route is gone or no longer claimable.
    pub async fn mark_syncing(&self, route_id: Uuid) -> Result<Option<Route>> {
        let _guard = self.lock_route(route_id).await;

        let mut tx = self.pool().begin().await?;
        let claimed = sqlx::query(
            "UPDATE routes SET sync_status = 'syncing', edited_during_sync = 0
             WHERE id = ? AND sync_status = 'pending' AND recording = 0",
        )
        .bind(route_id.to_string())
        .execute(&mut *tx)
        .await?;

        if claimed.rows_affected() == 0 {
            return Ok(None);
        }
        let route = super::load_route(&mut tx, route_id).await?;
        tx.commit().await?;
        Ok(route)
    }

    /// Persist upload progress after a header or point batch
    ///
    /// Returns false if the route was deleted in the meantime.
    pub async fn record_uploaded_points(&self, route_id: Uuid, remote_id: &str, uploaded: usize) -> Result<bool> {
        let _guard = self.lock_route(route_id).await;

        let result = sqlx::query("UPDATE routes SET remote_id = ?, uploaded_points = ? WHERE id = ?")
            .bind(remote_id)
            .bind(uploaded as i64)
            .bind(route_id.to_string())
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Record a fully uploaded route
    pub async fn complete_sync(&self, route_id: Uuid, remote_id: &str) -> Result<CompletionOutcome> {
        let _guard = self.lock_route(route_id).await;

        let mut tx = self.pool().begin().await?;
        let edited: Option<bool> = sqlx::query_scalar("SELECT edited_during_sync FROM routes WHERE id = ?")
            .bind(route_id.to_string())
            .fetch_optional(&mut *tx)
            .await?;

        let outcome = match edited {
            None => return Ok(CompletionOutcome::Missing),
            Some(true) => CompletionOutcome::Requeued,
            Some(false) => CompletionOutcome::Synced,
        };
        let status = match outcome {
            CompletionOutcome::Synced => "synced",
            _ => "pending",
        };

        sqlx::query(
            "UPDATE routes SET sync_status = ?, remote_id = ?, retry_count = 0,
                    next_retry_at = NULL, last_error = NULL, edited_during_sync = 0
             WHERE id = ?",
        )
        .bind(status)
        .bind(remote_id)
        .bind(route_id.to_string())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(outcome)
    }

    /// Return a route to `Pending` after a retryable failure
    pub async fn schedule_retry(
        &self,
        route_id: Uuid,
        retry_count: u32,
        next_retry_at: DateTime<Utc>,
        error: &str,
    ) -> Result<bool> {
        let _guard = self.lock_route(route_id).await;

        let result = sqlx::query(
            "UPDATE routes SET sync_status = 'pending',
                    retry_count = CASE WHEN edited_during_sync THEN 0 ELSE ? END,
                    next_retry_at = CASE WHEN edited_during_sync THEN NULL ELSE ? END,
                    last_error = ?, edited_during_sync = 0
             WHERE id = ?",
        )
        .bind(retry_count as i64)
        .bind(encode_ts(&next_retry_at))
        .bind(error)
        .bind(route_id.to_string())
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Give up on a route until the user retries it
    ///
    /// A route edited during the attempt is requeued instead.
    pub async fn mark_failed(&self, route_id: Uuid, retry_count: u32, error: &str) -> Result<bool> {
        let _guard = self.lock_route(route_id).await;

        let result = sqlx::query(
            "UPDATE routes SET
                    sync_status = CASE WHEN edited_during_sync THEN 'pending' ELSE 'failed' END,
                    retry_count = CASE WHEN edited_during_sync THEN 0 ELSE ? END,
                    next_retry_at = NULL, last_error = ?, edited_during_sync = 0
             WHERE id = ?",
        )
        .bind(retry_count as i64)
        .bind(error)
        .bind(route_id.to_string())
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Undo a claim without consuming a retry (session expired)
    pub async fn restore_pending(&self, route_id: Uuid, error: &str) -> Result<bool> {
        let _guard = self.lock_route(route_id).await;

        let result = sqlx::query(
            "UPDATE routes SET sync_status = 'pending', next_retry_at = NULL, last_error = ?,
                    retry_count = CASE WHEN edited_during_sync THEN 0 ELSE retry_count END,
                    edited_during_sync = 0
             WHERE id = ?",
        )
        .bind(error)
        .bind(route_id.to_string())
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Return routes stranded in `Syncing` by a crash to `Pending`
    pub async fn recover_interrupted(&self) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE routes SET sync_status = 'pending', edited_during_sync = 0
             WHERE sync_status = 'syncing'",
        )
        .execute(self.pool())
        .await?;

        let recovered = result.rows_affected();
        if recovered > 0 {
            tracing::warn!("Recovered {} routes interrupted mid-upload", recovered);
        }
        Ok(recovered)
    }

    /// Queued remote deletes, oldest first
    pub async fn list_pending_deletions(&self) -> Result<Vec<PendingDeletion>> {
        let rows = sqlx::query(
            "SELECT remote_id, queued_at, retry_count, last_error
             FROM pending_deletions ORDER BY queued_at, rowid",
        )
        .fetch_all(self.pool())
        .await?;

        rows.iter()
            .map(|row| {
                Ok(PendingDeletion {
                    remote_id: row.try_get("remote_id")?,
                    queued_at: decode_ts(&row.try_get::<String, _>("queued_at")?)?,
                    retry_count: row.try_get::<i64, _>("retry_count")?.clamp(0, u32::MAX as i64) as u32,
                    last_error: row.try_get("last_error")?,
                })
            })
            .collect()
    }

    /// Queue a remote delete; queuing the same id twice is a no-op
    pub async fn enqueue_remote_delete(&self, remote_id: &str) -> Result<()> {
        let mut conn = self.pool().acquire().await?;
        queue_deletion(&mut conn, remote_id).await
    }

    /// Forget a deletion that the remote confirmed (or that was given up)
    pub async fn complete_deletion(&self, remote_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM pending_deletions WHERE remote_id = ?")
            .bind(remote_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Record a failed delete attempt and return the new attempt count
    pub async fn fail_deletion(&self, remote_id: &str, error: &str) -> Result<u32> {
        let count: Option<i64> = sqlx::query_scalar(
            "UPDATE pending_deletions SET retry_count = retry_count + 1, last_error = ?
             WHERE remote_id = ? RETURNING retry_count",
        )
        .bind(error)
        .bind(remote_id)
        .fetch_optional(self.pool())
        .await?;

        count
            .map(|c| c.clamp(0, u32::MAX as i64) as u32)
            .ok_or_else(|| StoreError::Corrupt(format!("no queued deletion for remote id {}", remote_id)))
    }
}

pub(crate) async fn queue_deletion(conn: &mut SqliteConnection, remote_id: &str) -> Result<()> {
    sqlx::query(
        "INSERT INTO pending_deletions (remote_id, queued_at, retry_count)
         VALUES (?, ?, 0) ON CONFLICT (remote_id) DO NOTHING",
    )
    .bind(remote_id)
    .bind(encode_ts(&Utc::now()))
    .execute(&mut *conn)
    .await?;
    Ok(())
}
