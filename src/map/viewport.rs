//! Viewport filtering
//!
//! Picks the routes worth drawing for the visible map region. Pure and
//! cheap enough to run every frame.

use crate::shared::geo::Bounds;
use crate::shared::route::Route;
use serde::{Deserialize, Serialize};

/// Which point of a route decides whether it is visible
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Anchor {
    /// The first recorded point
    #[default]
    Start,
    /// Center of the route's own bounding box
    Center,
}

impl Anchor {
    /// Representative `(latitude, longitude)` of a route, `None` without points
    pub fn position(&self, route: &Route) -> Option<(f64, f64)> {
        match self {
            Anchor::Start => route.start_point().map(|p| (p.latitude, p.longitude)),
            Anchor::Center => Bounds::from_points(&route.points).map(|b| b.center()),
        }
    }
}

/// Routes whose anchor lies inside `bounds`, in input order
pub fn filter_by_bounds<'a>(routes: &'a [Route], bounds: &Bounds, anchor: Anchor) -> Vec<&'a Route> {
    routes
        .iter()
        .filter(|route| {
            anchor
                .position(route)
                .is_some_and(|(lat, lon)| bounds.contains(lat, lon))
        })
        .collect()
}
