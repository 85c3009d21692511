//! # Map Rendering Support
//!
//! Everything the map view needs to draw routes cheaply:
//!
//! - **Simplify**: Douglas-Peucker reduction with a zoom-dependent tolerance
//! - **Viewport**: picks the routes inside the visible bounds
//! - **Cache**: remembers simplified traces until their points change
//! - **Render**: combines the three into drawable polylines
//!
//! Nothing here reads or writes sync state, and the full-resolution trace
//! in the store is never replaced by a simplified one.

pub mod cache;
pub mod render;
pub mod simplify;
pub mod viewport;

pub use cache::{CacheStats, SimplificationCache};
pub use render::{visible_polylines, Polyline};
pub use simplify::{segment_distance, simplify, simplify_indices, tolerance_for_zoom, LatLon};
pub use viewport::{filter_by_bounds, Anchor};
