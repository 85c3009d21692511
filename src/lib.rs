//! trailsync - Main Library
//!
//! trailsync keeps GPS walking routes recorded on a handheld device usable
//! while offline, reconciles them with a remote store once connectivity
//! returns, and reduces long point traces so maps stay cheap to render.
//!
//! # Module Structure
//!
//! - **`shared`** - Types shared by every layer
//!   - Route and point model, geodesy helpers
//!   - Error taxonomy (`SyncError`) and configuration (`AppConfig`)
//!
//! - **`local_db`** - Durable on-device route store (SQLite via sqlx)
//!   - Routes with embedded point sequences and sync metadata
//!   - Per-route writer exclusion, pending queries, remote-delete queue
//!
//! - **`offline`** - Capture and retry plumbing
//!   - Bounded drop-oldest point buffer and the route recorder
//!   - Backoff strategies and bounded storage retries
//!
//! - **`remote`** - The remote collaborator boundary
//!   - `RemoteRouteStore` trait, REST implementation, in-memory double
//!
//! - **`sync`** - Offline-first synchronization
//!   - Connectivity monitor with debouncing
//!   - Sync engine with coalesced runs, classification and backoff
//!   - Auto-sync scheduler and the `SyncService` facade
//!
//! - **`map`** - Rendering support
//!   - Douglas-Peucker simplification with zoom-adaptive tolerance
//!   - Viewport filtering and a simplification cache
//!
//! # Data Flow
//!
//! Recording writes points into the local store. A debounced Online
//! transition triggers a sync run which drains pending routes oldest first
//! and writes statuses back. The render path reads routes, filters them by
//! viewport and simplifies them; it never touches sync state.
//!
//! # Error Handling
//!
//! - `StoreError` for local persistence failures
//! - `SyncError` for the closed remote/sync taxonomy
//! - `ConfigError` for configuration loading
//!
//! Recoverable sync failures never escape the engine; callers only see the
//! aggregate `SyncResult`.

/// Shared types and data structures
pub mod shared;

/// Local SQLite route store
pub mod local_db;

/// Capture buffering and retry logic
pub mod offline;

/// Remote collaborator contract and implementations
pub mod remote;

/// Synchronization engine, connectivity and scheduling
pub mod sync;

/// Route simplification and viewport filtering
pub mod map;

pub use local_db::{LocalRouteStore, StoreError};
pub use map::{filter_by_bounds, simplify, tolerance_for_zoom};
pub use shared::{AppConfig, Route, RoutePoint, SyncError, SyncStatus};
pub use sync::{SyncEngine, SyncResult, SyncService};
