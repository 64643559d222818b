//! Route geometry
//!
//! Pure functions over geographic coordinates:
//! - great-circle (haversine) distance
//! - projection of a point onto a segment in a local tangent plane
//! - closest point on a route polyline, used to re-locate an agent on resync
//!
//! Full segment lengths always use the great-circle distance; the planar
//! approximation is only used inside a single segment.

use crate::domain::Coordinate;
use crate::error::GeometryError;

/// Mean Earth radius in meters
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Projection of a point onto one segment A→B
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentProjection {
    /// Position of the projection along A→B, clamped to [0, 1]
    pub t: f64,
    /// Planar distance from the point to its projection (meters)
    pub distance_to_projection_m: f64,
    /// Planar distance from A to the projection (meters)
    pub distance_from_start_m: f64,
}

/// Closest location on a route to a given point
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RouteProjection {
    /// Index of the route point that begins the winning segment
    pub segment_index: usize,
    /// Fraction into the winning segment, in [0, 1]
    pub t: f64,
    /// Route distance from the first point to the projection (meters)
    pub distance_traveled_m: f64,
    pub distance_to_projection_m: f64,
}

/// Great-circle distance in meters (haversine). Symmetric, zero for coincident points.
pub fn great_circle_distance(a: &Coordinate, b: &Coordinate) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let dlat = (b.lat - a.lat).to_radians();
    let dlon = (b.lon - a.lon).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().min(1.0).asin();
    EARTH_RADIUS_M * c
}

/// Equirectangular projection of `p` into a plane centred on `origin` (meters).
fn to_local_plane(origin: &Coordinate, p: &Coordinate, ref_lat_rad: f64) -> (f64, f64) {
    let x = (p.lon - origin.lon).to_radians() * ref_lat_rad.cos() * EARTH_RADIUS_M;
    let y = (p.lat - origin.lat).to_radians() * EARTH_RADIUS_M;
    (x, y)
}

/// Project `p` onto segment A→B.
///
/// Valid for segments up to tens of kilometers. `t` is clamped so the
/// projection never leaves the segment; a degenerate segment (A = B) yields `t = 0`.
pub fn project_onto_segment(a: &Coordinate, b: &Coordinate, p: &Coordinate) -> SegmentProjection {
    let ref_lat = ((a.lat + b.lat) / 2.0).to_radians();
    let (bx, by) = to_local_plane(a, b, ref_lat);
    let (px, py) = to_local_plane(a, p, ref_lat);

    let seg_len_sq = bx * bx + by * by;
    let t = if seg_len_sq > 0.0 {
        ((px * bx + py * by) / seg_len_sq).clamp(0.0, 1.0)
    } else {
        0.0
    };

    let proj_x = bx * t;
    let proj_y = by * t;
    let dx = px - proj_x;
    let dy = py - proj_y;

    SegmentProjection {
        t,
        distance_to_projection_m: (dx * dx + dy * dy).sqrt(),
        distance_from_start_m: seg_len_sq.sqrt() * t,
    }
}

/// Great-circle length of every segment of a route
pub fn segment_lengths(points: &[Coordinate]) -> Vec<f64> {
    points
        .windows(2)
        .map(|w| great_circle_distance(&w[0], &w[1]))
        .collect()
}

/// Total great-circle length of a route
pub fn route_length(points: &[Coordinate]) -> f64 {
    segment_lengths(points).iter().sum()
}

/// Find the closest point on a route to `p`.
///
/// Every segment is examined; the first segment reaching the minimum distance
/// wins. `distance_traveled_m` is the sum of preceding great-circle segment
/// lengths plus `t` times the winning segment's great-circle length.
///
/// A single-point route yields segment 0, `t = 0`. An empty route is an error.
pub fn closest_point_on_route(
    points: &[Coordinate],
    p: &Coordinate,
) -> Result<RouteProjection, GeometryError> {
    match points {
        [] => Err(GeometryError::EmptyRoute),
        [only] => Ok(RouteProjection {
            segment_index: 0,
            t: 0.0,
            distance_traveled_m: 0.0,
            distance_to_projection_m: great_circle_distance(only, p),
        }),
        _ => {
            let mut best: Option<(usize, SegmentProjection)> = None;
            for (i, w) in points.windows(2).enumerate() {
                let proj = project_onto_segment(&w[0], &w[1], p);
                let better = match &best {
                    Some((_, current)) => {
                        proj.distance_to_projection_m < current.distance_to_projection_m
                    }
                    None => true,
                };
                if better {
                    best = Some((i, proj));
                }
            }

            // At least one window exists for len >= 2
            let (segment_index, proj) = best.ok_or(GeometryError::EmptyRoute)?;
            let preceding: f64 = points[..=segment_index]
                .windows(2)
                .map(|w| great_circle_distance(&w[0], &w[1]))
                .sum();
            let segment_len =
                great_circle_distance(&points[segment_index], &points[segment_index + 1]);

            Ok(RouteProjection {
                segment_index,
                t: proj.t,
                distance_traveled_m: preceding + segment_len * proj.t,
                distance_to_projection_m: proj.distance_to_projection_m,
            })
        }
    }
}
