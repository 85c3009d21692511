//! Shared Module
//!
//! Types used by every layer of the crate: the route model, geodesy helpers,
//! the error taxonomy and application configuration. Nothing in here talks to
//! the database or the network.

/// Route and point data structures
pub mod route;

/// Distance and bounding-box helpers
pub mod geo;

/// Shared error types
pub mod error;

/// Application configuration
pub mod config;

pub use config::{AppConfig, AppConfigBuilder, ConfigError};
pub use error::{Disposition, ErrorKind, SyncError};
pub use self::geo::Bounds;
pub use route::{Route, RouteEdit, RoutePoint, SyncStatus};
