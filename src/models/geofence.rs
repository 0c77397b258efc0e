use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geo::LatLon;

/// Geofence shape. Serialized adjacently tagged as
/// `{"type": "circle"|"polygon", "metadata": {...}}`, which is the shape the
/// persistence service stores, so a record can never carry both variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "metadata", rename_all = "lowercase")]
pub enum GeofenceGeometry {
    #[serde(rename_all = "camelCase")]
    Circle { center: LatLon, radius_km: f64 },
    Polygon { path: Vec<LatLon> },
}

impl GeofenceGeometry {
    pub fn circle(center: LatLon, radius_km: f64) -> Self {
        GeofenceGeometry::Circle { center, radius_km }
    }

    pub fn polygon(path: Vec<LatLon>) -> Self {
        GeofenceGeometry::Polygon { path }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            GeofenceGeometry::Circle { .. } => "circle",
            GeofenceGeometry::Polygon { .. } => "polygon",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Geofence {
    pub id: Uuid,
    pub organization_id: String,
    pub name: String,
    #[serde(flatten)]
    pub geometry: GeofenceGeometry,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Operator input for a new geofence, before it has been persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeofenceDraft {
    pub organization_id: String,
    pub name: String,
    #[serde(flatten)]
    pub geometry: GeofenceGeometry,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_circle_wire_shape() {
        let geometry = GeofenceGeometry::circle(LatLon::new(19.43, -99.13), 1.5);
        assert_eq!(
            serde_json::to_value(&geometry).unwrap(),
            json!({
                "type": "circle",
                "metadata": {"center": {"lat": 19.43, "lng": -99.13}, "radiusKm": 1.5}
            })
        );
    }

    #[test]
    fn test_geofence_record_parses_polygon() {
        let record = json!({
            "id": "6f1c2f9e-8d0c-4a55-9a4e-5d2b2b8f9c11",
            "organizationId": "org-1",
            "name": "Depot",
            "type": "polygon",
            "metadata": {"path": [
                {"lat": 0.0, "lng": 0.0},
                {"lat": 0.0, "lng": 1.0},
                {"lat": 1.0, "lng": 1.0}
            ]},
            "isActive": true,
            "createdAt": "2025-01-01T00:00:00Z",
            "updatedAt": "2025-01-02T00:00:00Z"
        });

        let geofence: Geofence = serde_json::from_value(record).unwrap();
        assert_eq!(geofence.name, "Depot");
        assert_eq!(geofence.geometry.kind(), "polygon");
        match &geofence.geometry {
            GeofenceGeometry::Polygon { path } => assert_eq!(path.len(), 3),
            other => panic!("unexpected geometry {:?}", other),
        }
    }

    #[test]
    fn test_unknown_geometry_type_is_rejected() {
        let record = json!({"type": "hexagon", "metadata": {}});
        assert!(serde_json::from_value::<GeofenceGeometry>(record).is_err());
    }
}
