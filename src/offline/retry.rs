//! # Retry Logic and Backoff Strategies
//!
//! Backoff schedules for remote retries and bounded retries for local
//! storage operations.
//!
//! ## Features
//!
//! - **Exponential Backoff**: intervals double from a base up to a cap
//! - **Max Attempts**: a route that keeps failing moves to `Failed`
//! - **Storage Retries**: a short, fixed number of attempts for SQLite calls
//!
//! Waits carry no jitter, so the schedule for one route is non-decreasing.
//!
//! ## Usage
//!
//! ```rust
//! use std::time::Duration;
//! use trailsync::offline::retry::{BackoffStrategy, RetryDecision, RetryPolicy};
//!
//! let policy = RetryPolicy {
//!     max_attempts: 3,
//!     backoff: BackoffStrategy::exponential(Duration::from_secs(30), Duration::from_secs(600)),
//! };
//! let now = chrono::Utc::now();
//! assert!(matches!(policy.decide(1, now), RetryDecision::RetryAt(_)));
//! assert_eq!(policy.decide(3, now), RetryDecision::GiveUp);
//! ```

use crate::local_db::StoreError;
use crate::shared::config::SyncSettings;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::time::Duration;

/// Backoff strategy configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackoffStrategy {
    /// Fixed interval between retries
    Fixed {
        interval: Duration,
    },
    /// Doubling interval
    Exponential {
        /// Wait after the first failure
        base_interval: Duration,
        /// Upper bound for any single wait
        max_interval: Duration,
    },
}

impl BackoffStrategy {
    pub fn exponential(base_interval: Duration, max_interval: Duration) -> Self {
        Self::Exponential {
            base_interval,
            max_interval,
        }
    }

    /// Wait before retry number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self {
            BackoffStrategy::Fixed { interval } => *interval,
            BackoffStrategy::Exponential {
                base_interval,
                max_interval,
            } => {
                let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
                base_interval
                    .checked_mul(factor)
                    .unwrap_or(*max_interval)
                    .min(*max_interval)
            }
        }
    }
}

/// What to do with a route after a retryable failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Back to `Pending`, not before the given time
    RetryAt(DateTime<Utc>),
    /// Attempt budget exhausted
    GiveUp,
}

/// Attempt budget plus backoff schedule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: BackoffStrategy,
}

impl RetryPolicy {
    /// Decide after `failures` consecutive retryable failures
    pub fn decide(&self, failures: u32, now: DateTime<Utc>) -> RetryDecision {
        if failures >= self.max_attempts {
            return RetryDecision::GiveUp;
        }
        let delay = self.backoff.delay_for(failures);
        let at = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|delay| now.checked_add_signed(delay))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        RetryDecision::RetryAt(at)
    }
}

impl From<&SyncSettings> for RetryPolicy {
    fn from(settings: &SyncSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts,
            backoff: BackoffStrategy::exponential(
                Duration::from_secs(settings.backoff_base_secs),
                Duration::from_secs(settings.backoff_max_secs),
            ),
        }
    }
}

/// Bounded retry for local storage calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageRetry {
    pub attempts: u32,
    pub pause: Duration,
}

impl Default for StorageRetry {
    fn default() -> Self {
        Self {
            attempts: 3,
            pause: Duration::from_millis(50),
        }
    }
}

impl From<&SyncSettings> for StorageRetry {
    fn from(settings: &SyncSettings) -> Self {
        Self {
            attempts: settings.storage_retry_attempts.max(1),
            pause: Duration::from_millis(settings.storage_retry_pause_ms),
        }
    }
}

impl StorageRetry {
    /// Run `op`, repeating it on retryable store errors
    ///
    /// Non-retryable errors (missing route, bad sequence) return immediately.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let attempts = self.attempts.max(1);
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < attempts => {
                    tracing::warn!("{} failed (attempt {}/{}): {}", label, attempt, attempts, e);
                    tokio::time::sleep(self.pause).await;
                    attempt += 1;
                }
                Err(e) => {
                    if e.is_retryable() {
                        tracing::error!("{} failed after {} attempts: {}", label, attempts, e);
                    }
                    return Err(e);
                }
            }
        }
    }
}
