//! Property-based tests for route simplification

use crate::common::zigzag_trace;
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use trailsync::map::{simplify, simplify_indices, tolerance_for_zoom};

/// Random walks of up to 80 fixes within a few hundred meters
fn trace() -> impl Strategy<Value = Vec<(f64, f64)>> {
    prop::collection::vec((-0.002f64..0.002, -0.002f64..0.002), 0..80).prop_map(|steps| {
        let mut position = (46.5, 7.9);
        steps
            .into_iter()
            .map(|(d_lat, d_lon)| {
                position = (position.0 + d_lat, position.1 + d_lon);
                position
            })
            .collect()
    })
}

proptest! {
    #[test]
    fn test_simplify_is_idempotent(points in trace(), tolerance in 0.5f64..200.0) {
        let once = simplify(&points, tolerance);
        let twice = simplify(&once, tolerance);
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn test_simplify_keeps_endpoints(points in trace(), tolerance in 0.5f64..200.0) {
        let simplified = simplify(&points, tolerance);
        prop_assert_eq!(simplified.first(), points.first());
        prop_assert_eq!(simplified.last(), points.last());
        prop_assert!(simplified.len() <= points.len());
    }

    #[test]
    fn test_simplify_output_is_subsequence(points in trace(), tolerance in 0.5f64..200.0) {
        let indices = simplify_indices(&points, tolerance);
        prop_assert!(indices.windows(2).all(|w| w[0] < w[1]));
        prop_assert!(indices.iter().all(|&i| i < points.len()));
    }

    #[test]
    fn test_larger_tolerance_never_keeps_more(
        points in trace(),
        low in 0.5f64..100.0,
        extra in 0.0f64..100.0,
    ) {
        let fine = simplify(&points, low);
        let coarse = simplify(&points, low + extra);
        prop_assert!(fine.len() >= coarse.len());
    }

    #[test]
    fn test_zoom_tolerance_is_monotonic(a in 0.0f64..22.0, b in 0.0f64..22.0) {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(tolerance_for_zoom(low) >= tolerance_for_zoom(high));
    }
}

#[test]
fn test_near_collinear_fixes_are_removed() {
    let trace = zigzag_trace();
    assert_eq!(trace.len(), 12);

    let simplified = simplify(&trace, 5.0);
    assert_eq!(simplified.len(), 9);
    assert_eq!(simplified.first(), trace.first());
    assert_eq!(simplified.last(), trace.last());
    let sequences: Vec<i64> = simplified.iter().map(|p| p.sequence).collect();
    assert_eq!(sequences, vec![0, 1, 3, 4, 5, 7, 8, 10, 11]);
}
