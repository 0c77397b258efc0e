use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::{info, warn};

use super::queries;
use super::rows::VehicleRow;
use super::{DbPool, VehicleSource};
use crate::error::SourceError;
use crate::models::{DeviceTelemetry, EntityType, Vehicle};

/// Reads vehicles and joins the last state the trip service recorded for
/// each device.
#[derive(Clone)]
pub struct PgVehicleSource {
    pool: DbPool,
}

impl PgVehicleSource {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

impl VehicleSource for PgVehicleSource {
    fn fetch_vehicles<'a>(&'a self, org_id: &'a str) -> BoxFuture<'a, Result<Vec<Vehicle>, SourceError>> {
        async move {
            let rows: Vec<VehicleRow> = sqlx::query_as(queries::SELECT_VEHICLES_FOR_ORG)
                .bind(org_id)
                .fetch_all(&self.pool)
                .await?;
            info!("Fetched {} vehicles for organization {}", rows.len(), org_id);
            Ok(rows.into_iter().map(vehicle_from_row).collect())
        }
        .boxed()
    }
}

pub(crate) fn vehicle_from_row(row: VehicleRow) -> Vehicle {
    let entity_type = match row.entity_type.as_deref() {
        None => EntityType::default(),
        Some(raw) => EntityType::parse(raw).unwrap_or_else(|| {
            warn!("Vehicle {} has unknown entity type '{}'", row.vehicle_id, raw);
            EntityType::default()
        }),
    };

    let device = row
        .device_id
        .filter(|d| !d.trim().is_empty())
        .map(|device_id| {
            let speed = row.last_speed.unwrap_or(0.0);
            DeviceTelemetry {
                device_id,
                latitude: row.last_lat.unwrap_or(0.0),
                longitude: row.last_lng.unwrap_or(0.0),
                speed,
                direction: 0,
                ignition: row.ignition_on.unwrap_or(false),
                movement: speed > 0.0,
                battery: 0.0,
                timestamp: row.last_point_at.map(|t| t.and_utc()).unwrap_or_default(),
            }
        });

    Vehicle {
        id: row.vehicle_id,
        organization_id: row.organization_id,
        name: row.name.unwrap_or_default(),
        entity_type,
        device,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MotionStatus;
    use chrono::NaiveDate;

    fn row(device_id: Option<&str>) -> VehicleRow {
        VehicleRow {
            vehicle_id: "v1".to_string(),
            organization_id: "org-1".to_string(),
            name: Some("Truck 7".to_string()),
            entity_type: Some("ASSET".to_string()),
            device_id: device_id.map(str::to_string),
            ignition_on: Some(true),
            last_point_at: NaiveDate::from_ymd_opt(2025, 4, 2)
                .unwrap()
                .and_hms_opt(10, 30, 0),
            last_lat: Some(20.6),
            last_lng: Some(-103.3),
            last_speed: Some(0.0),
        }
    }

    #[test]
    fn test_row_with_state_becomes_trackable_vehicle() {
        let vehicle = vehicle_from_row(row(Some("867530")));
        assert_eq!(vehicle.entity_type, EntityType::Asset);
        assert_eq!(vehicle.device_id(), Some("867530"));
        assert_eq!(vehicle.status(), Some(MotionStatus::Idling));
        let device = vehicle.device.unwrap();
        assert_eq!(device.latitude, 20.6);
        assert_eq!(device.timestamp.to_rfc3339(), "2025-04-02T10:30:00+00:00");
    }

    #[test]
    fn test_blank_device_is_not_trackable() {
        assert!(!vehicle_from_row(row(Some("  "))).is_trackable());
        assert!(!vehicle_from_row(row(None)).is_trackable());
    }

    #[test]
    fn test_unknown_entity_type_defaults_to_vehicle() {
        let mut r = row(None);
        r.entity_type = Some("trailer".to_string());
        assert_eq!(vehicle_from_row(r).entity_type, EntityType::Vehicle);
    }
}
