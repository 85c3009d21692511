//! Geodesy helpers shared by recording and rendering.

use crate::shared::route::RoutePoint;
use geo::{Distance, Haversine, Point};
use serde::{Deserialize, Serialize};

/// Mean Earth radius in meters
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Great-circle distance between two coordinates, in meters
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    Haversine::distance(Point::new(lon1, lat1), Point::new(lon2, lat2))
}

/// Summed haversine length of a trace
pub fn path_length(points: &[RoutePoint]) -> f64 {
    points
        .windows(2)
        .map(|w| haversine_distance(w[0].latitude, w[0].longitude, w[1].latitude, w[1].longitude))
        .sum()
}

/// Wrap a longitude difference into [-180, 180)
pub fn wrap_longitude_delta(delta: f64) -> f64 {
    (delta + 180.0).rem_euclid(360.0) - 180.0
}

/// Axis-aligned geographic bounding box
///
/// `west > east` means the box crosses the antimeridian.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub south: f64,
    pub west: f64,
    pub north: f64,
    pub east: f64,
}

impl Bounds {
    pub fn new(south: f64, west: f64, north: f64, east: f64) -> Self {
        Self {
            south,
            west,
            north,
            east,
        }
    }

    /// Smallest box containing every point, or `None` for an empty trace
    ///
    /// The longitude extent is the complement of the widest empty arc, so a
    /// trace crossing the antimeridian yields a box with `west > east`.
    pub fn from_points(points: &[RoutePoint]) -> Option<Self> {
        let first = points.first()?;
        let (mut south, mut north) = (first.latitude, first.latitude);
        let mut longitudes = Vec::with_capacity(points.len());
        for p in points {
            south = south.min(p.latitude);
            north = north.max(p.latitude);
            longitudes.push(wrap_longitude_delta(p.longitude));
        }
        longitudes.sort_by(f64::total_cmp);

        let (min, max) = (longitudes[0], longitudes[longitudes.len() - 1]);
        // gap across the antimeridian first, so ties keep the plain box
        let mut widest_gap = min + 360.0 - max;
        let (mut west, mut east) = (min, max);
        for pair in longitudes.windows(2) {
            let gap = pair[1] - pair[0];
            if gap > widest_gap {
                widest_gap = gap;
                west = pair[1];
                east = pair[0];
            }
        }
        Some(Self::new(south, west, north, east))
    }

    pub fn crosses_antimeridian(&self) -> bool {
        self.west > self.east
    }

    /// Inclusive containment test
    pub fn contains(&self, latitude: f64, longitude: f64) -> bool {
        if latitude < self.south || latitude > self.north {
            return false;
        }
        if self.crosses_antimeridian() {
            longitude >= self.west || longitude <= self.east
        } else {
            longitude >= self.west && longitude <= self.east
        }
    }

    /// Center of the box as `(latitude, longitude)`
    pub fn center(&self) -> (f64, f64) {
        let lat = (self.south + self.north) / 2.0;
        let span = if self.crosses_antimeridian() {
            self.east + 360.0 - self.west
        } else {
            self.east - self.west
        };
        let lon = self.west + span / 2.0;
        (lat, wrap_longitude_delta(lon))
    }
}
