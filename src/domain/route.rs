use serde::{Deserialize, Serialize};

use super::state::RunStatus;
use crate::error::GeometryError;

/// Geographic coordinate in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinate {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Linear interpolation in coordinate space.
    ///
    /// Only accurate at the scale of a single route segment.
    pub fn lerp(&self, other: &Coordinate, fraction: f64) -> Coordinate {
        Coordinate {
            lat: self.lat + (other.lat - self.lat) * fraction,
            lon: self.lon + (other.lon - self.lon) * fraction,
        }
    }
}

/// Ordered polyline an agent traverses. Never empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Coordinate>", into = "Vec<Coordinate>")]
pub struct Route {
    points: Vec<Coordinate>,
}

impl Route {
    pub fn new(points: Vec<Coordinate>) -> Result<Self, GeometryError> {
        if points.is_empty() {
            return Err(GeometryError::EmptyRoute);
        }
        Ok(Self { points })
    }

    pub fn points(&self) -> &[Coordinate] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Number of segments (consecutive point pairs)
    pub fn segment_count(&self) -> usize {
        self.points.len().saturating_sub(1)
    }

    pub fn first(&self) -> Coordinate {
        self.points[0]
    }
}

impl TryFrom<Vec<Coordinate>> for Route {
    type Error = GeometryError;

    fn try_from(points: Vec<Coordinate>) -> Result<Self, Self::Error> {
        Route::new(points)
    }
}

impl From<Route> for Vec<Coordinate> {
    fn from(route: Route) -> Self {
        route.points
    }
}

/// One assignment of a route to one agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    /// Identifier of the route in the routing service
    pub route_id: String,
    pub route: Route,
    pub target_altitude_m: f64,
    pub target_speed_mps: f64,
    #[serde(default = "default_run_status")]
    pub status: RunStatus,
}

fn default_run_status() -> RunStatus {
    RunStatus::NotStarted
}

impl Run {
    pub fn new(
        id: impl Into<String>,
        route_id: impl Into<String>,
        route: Route,
        target_altitude_m: f64,
        target_speed_mps: f64,
    ) -> Self {
        Self {
            id: id.into(),
            route_id: route_id.into(),
            route,
            target_altitude_m,
            target_speed_mps,
            status: RunStatus::NotStarted,
        }
    }
}
