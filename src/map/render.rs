//! Render path: viewport filter, zoom tolerance, cached simplification.

use super::cache::SimplificationCache;
use super::simplify::tolerance_for_zoom;
use super::viewport::{filter_by_bounds, Anchor};
use crate::shared::geo::Bounds;
use crate::shared::route::Route;
use serde::Serialize;
use uuid::Uuid;

/// A route ready to draw
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Polyline {
    pub route_id: Uuid,
    /// `(latitude, longitude)` vertices
    pub vertices: Vec<(f64, f64)>,
}

/// Simplified polylines for the routes visible in `bounds` at `zoom`
///
/// `routes` is the full set on the map; cache entries of routes missing from
/// it are evicted.
pub fn visible_polylines(
    routes: &[Route],
    bounds: &Bounds,
    zoom: f64,
    cache: &SimplificationCache,
) -> Vec<Polyline> {
    let tolerance = tolerance_for_zoom(zoom);
    cache.retain_routes(routes.iter().map(|route| route.id));
    filter_by_bounds(routes, bounds, Anchor::Start)
        .into_iter()
        .map(|route| Polyline {
            route_id: route.id,
            vertices: cache
                .get_or_simplify(route, tolerance)
                .iter()
                .map(|p| (p.latitude, p.longitude))
                .collect(),
        })
        .collect()
}
