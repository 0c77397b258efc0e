//! Geofence geometry engine.
//!
//! Stateless functions that validate operator input, turn either geometry
//! variant into a boundary polygon, and answer containment queries.

mod csv;
mod monitor;

pub use csv::parse_csv_polygon;
pub use monitor::{GeofenceCrossing, GeofenceMonitor, Transition};

use crate::error::GeometryError;
use crate::geo::{self, BoundingBox, LatLon};
use crate::models::GeofenceGeometry;

/// Sides used to approximate a circle when the caller does not choose.
pub const DEFAULT_STEPS: usize = 64;

/// Slack applied to the circle radius test so that vertices of the boundary
/// polygon, which sit exactly on the radius, are reported as inside.
pub const BOUNDARY_TOLERANCE_KM: f64 = 1e-9;

/// Rejects out-of-range coordinates, non-positive radii and short paths.
/// Never clamps.
pub fn validate(geometry: &GeofenceGeometry) -> Result<(), GeometryError> {
    match geometry {
        GeofenceGeometry::Circle { center, radius_km } => {
            validate_point(center, "center")?;
            if !radius_km.is_finite() {
                return Err(GeometryError::invalid(
                    "radius_km",
                    "radius must be a finite number",
                ));
            }
            if *radius_km <= 0.0 {
                return Err(GeometryError::invalid(
                    "radius_km",
                    "radius must be greater than 0",
                ));
            }
            Ok(())
        }
        GeofenceGeometry::Polygon { path } => {
            if path.len() < 3 {
                return Err(GeometryError::invalid(
                    "path",
                    format!("polygon needs at least 3 points, found {}", path.len()),
                ));
            }
            for (i, point) in path.iter().enumerate() {
                validate_point(point, &format!("path[{}]", i))?;
            }
            Ok(())
        }
    }
}

fn validate_point(point: &LatLon, field: &str) -> Result<(), GeometryError> {
    if !point.lat.is_finite() || !(-90.0..=90.0).contains(&point.lat) {
        return Err(GeometryError::invalid(
            format!("{}.lat", field),
            format!("latitude must be between -90 and 90, got {}", point.lat),
        ));
    }
    if !point.lon.is_finite() || !(-180.0..=180.0).contains(&point.lon) {
        return Err(GeometryError::invalid(
            format!("{}.lon", field),
            format!("longitude must be between -180 and 180, got {}", point.lon),
        ));
    }
    Ok(())
}

/// Validates and returns the canonical form stored by persistence: polygons
/// are kept open, so an explicit closing vertex is dropped.
pub fn normalize(geometry: GeofenceGeometry) -> Result<GeofenceGeometry, GeometryError> {
    let geometry = match geometry {
        GeofenceGeometry::Polygon { mut path } => {
            if path.len() > 1 && path.first() == path.last() {
                path.pop();
            }
            GeofenceGeometry::Polygon { path }
        }
        circle => circle,
    };
    validate(&geometry)?;
    Ok(geometry)
}

/// Closed boundary ring for any geometry.
///
/// Circles become a `steps`-sided polygon built with the geodesic
/// destination formula, so longitude spacing widens with latitude as it
/// should. The ring is closed: the first vertex is repeated at the end.
pub fn to_boundary_polygon(
    geometry: &GeofenceGeometry,
    steps: usize,
) -> Result<Vec<LatLon>, GeometryError> {
    match geometry {
        GeofenceGeometry::Circle { center, radius_km } => {
            if steps < 3 {
                return Err(GeometryError::invalid(
                    "steps",
                    format!("circle approximation needs at least 3 steps, got {}", steps),
                ));
            }
            Ok(circle_ring(*center, *radius_km, steps))
        }
        GeofenceGeometry::Polygon { path } => Ok(closed_ring(path)),
    }
}

fn circle_ring(center: LatLon, radius_km: f64, steps: usize) -> Vec<LatLon> {
    let mut ring: Vec<LatLon> = (0..steps)
        .map(|i| {
            let bearing = -360.0 * i as f64 / steps as f64;
            geo::destination(center, radius_km, bearing)
        })
        .collect();
    if let Some(first) = ring.first().copied() {
        ring.push(first);
    }
    ring
}

fn closed_ring(path: &[LatLon]) -> Vec<LatLon> {
    let mut ring = path.to_vec();
    if let (Some(first), Some(last)) = (path.first(), path.last()) {
        if first != last {
            ring.push(*first);
        }
    }
    ring
}

/// Extent of the boundary polygon, for fitting a viewport. `None` when the
/// geometry has no points at all.
pub fn bounding_box(geometry: &GeofenceGeometry) -> Option<BoundingBox> {
    match geometry {
        GeofenceGeometry::Circle { center, radius_km } => {
            BoundingBox::from_points(&circle_ring(*center, *radius_km, DEFAULT_STEPS))
        }
        GeofenceGeometry::Polygon { path } => BoundingBox::from_points(path),
    }
}

/// Containment test. Circles use the great-circle distance to the center,
/// polygons use ray casting. Both are inclusive at the boundary.
pub fn contains(geometry: &GeofenceGeometry, point: LatLon) -> bool {
    match geometry {
        GeofenceGeometry::Circle { center, radius_km } => {
            geo::haversine_km(*center, point) <= radius_km + BOUNDARY_TOLERANCE_KM
        }
        GeofenceGeometry::Polygon { path } => geo::point_in_polygon(point, path),
    }
}
