//! # Offline Capture and Retry
//!
//! Pieces that let the device keep working without a network: recording
//! never waits on storage, and failed work is retried on a bounded schedule.
//!
//! ## Key Components
//!
//! - `buffer.rs`: bounded drop-oldest point buffer
//! - `recorder.rs`: live route capture feeding the local store
//! - `retry.rs`: backoff strategies, retry policy and storage retries
//!
//! ## Usage
//!
//! ```rust,ignore
//! use trailsync::offline::{RouteRecorder, StorageRetry};
//!
//! let recorder = RouteRecorder::start(store, &config.recording, StorageRetry::default(), "user-1", "Morning walk").await?;
//! recorder.record(35.68, 139.76, Some(40.0), chrono::Utc::now());
//! let summary = recorder.finish().await?;
//! ```

pub mod buffer;
pub mod recorder;
pub mod retry;

pub use buffer::{PointBuffer, PushOutcome};
pub use recorder::{RecordingSummary, RouteRecorder};
pub use retry::{BackoffStrategy, RetryDecision, RetryPolicy, StorageRetry};
