//! Douglas-Peucker simplification
//!
//! Distances are meters on a local equirectangular projection centered on
//! the chord's mean latitude, measured to the chord segment rather than the
//! infinite line. Closed loops (first point == last point) therefore still
//! simplify instead of collapsing.
//!
//! `geo::Simplify` is not used here: it compares planar degrees, so its
//! tolerance cannot be given in meters, and it recurses per split where this
//! walks an explicit stack.

use crate::shared::geo::{wrap_longitude_delta, EARTH_RADIUS_M};
use crate::shared::route::RoutePoint;
use geo::{Coord, Line};

/// Meters per degree of latitude
const METERS_PER_DEGREE: f64 = EARTH_RADIUS_M * std::f64::consts::PI / 180.0;

/// Anything with a geographic position
pub trait LatLon {
    /// `(latitude, longitude)` in degrees
    fn lat_lon(&self) -> (f64, f64);
}

impl LatLon for RoutePoint {
    fn lat_lon(&self) -> (f64, f64) {
        (self.latitude, self.longitude)
    }
}

impl LatLon for (f64, f64) {
    fn lat_lon(&self) -> (f64, f64) {
        *self
    }
}

/// Tolerance in meters for a map zoom level
///
/// Coarser zooms tolerate more deviation. The steps are 0.001, 0.0005,
/// 0.0001 and 0.00005 degrees at roughly 110 km per degree.
pub fn tolerance_for_zoom(zoom: f64) -> f64 {
    if zoom < 10.0 {
        110.0
    } else if zoom < 13.0 {
        55.0
    } else if zoom < 15.0 {
        11.0
    } else {
        5.5
    }
}

/// Simplify a trace, keeping only points that deviate more than
/// `tolerance` meters from the simplified line
///
/// The result always starts and ends with the input's endpoints and is a
/// subsequence of the input. Traces of two points or fewer come back as-is.
pub fn simplify<P: LatLon + Clone>(points: &[P], tolerance: f64) -> Vec<P> {
    simplify_indices(points, tolerance)
        .into_iter()
        .map(|i| points[i].clone())
        .collect()
}

/// Indices of the points [`simplify`] keeps, ascending
pub fn simplify_indices<P: LatLon>(points: &[P], tolerance: f64) -> Vec<usize> {
    let n = points.len();
    if n <= 2 {
        return (0..n).collect();
    }

    let mut keep = vec![false; n];
    keep[0] = true;
    keep[n - 1] = true;

    let mut stack = vec![(0usize, n - 1)];
    while let Some((start, end)) = stack.pop() {
        if end - start < 2 {
            continue;
        }
        let a = points[start].lat_lon();
        let b = points[end].lat_lon();

        // first index wins ties so the result does not depend on traversal order
        let mut farthest = start;
        let mut max_distance = -1.0;
        for (offset, point) in points[start + 1..end].iter().enumerate() {
            let d = segment_distance(point.lat_lon(), a, b);
            if d > max_distance {
                max_distance = d;
                farthest = start + 1 + offset;
            }
        }

        if max_distance > tolerance {
            keep[farthest] = true;
            stack.push((start, farthest));
            stack.push((farthest, end));
        }
    }

    keep.iter()
        .enumerate()
        .filter_map(|(i, kept)| kept.then_some(i))
        .collect()
}

/// Distance in meters from `p` to the segment `a`-`b`
pub fn segment_distance(p: (f64, f64), a: (f64, f64), b: (f64, f64)) -> f64 {
    let cos_lat = ((a.0 + b.0) / 2.0).to_radians().cos();
    // meters east/north of `a`
    let project = |q: (f64, f64)| Coord {
        x: wrap_longitude_delta(q.1 - a.1) * cos_lat * METERS_PER_DEGREE,
        y: (q.0 - a.0) * METERS_PER_DEGREE,
    };

    let chord = Line::new(project(a), project(b));
    let p = project(p);
    let delta = chord.delta();
    let length_sq = delta.x * delta.x + delta.y * delta.y;
    let closest = if length_sq == 0.0 {
        chord.start
    } else {
        let offset = p - chord.start;
        let t = ((offset.x * delta.x + offset.y * delta.y) / length_sq).clamp(0.0, 1.0);
        chord.start + delta * t
    };
    let gap = p - closest;
    gap.x.hypot(gap.y)
}
