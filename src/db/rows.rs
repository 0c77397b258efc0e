//! Raw table rows. Conversion into domain models lives next to the source
//! that reads them.

use chrono::NaiveDateTime;
use serde_json::Value;
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, FromRow)]
pub struct VehicleRow {
    pub vehicle_id: String,
    pub organization_id: String,
    pub name: Option<String>,
    pub entity_type: Option<String>,
    pub device_id: Option<String>,
    // trip_current_state, absent until the device reports
    pub ignition_on: Option<bool>,
    pub last_point_at: Option<NaiveDateTime>,
    pub last_lat: Option<f64>,
    pub last_lng: Option<f64>,
    pub last_speed: Option<f64>,
}

#[derive(Debug, Clone, FromRow)]
pub struct TripRow {
    pub trip_id: Uuid,
    pub device_id: String,
    pub start_time: NaiveDateTime,
    pub start_lat: Option<f64>,
    pub start_lng: Option<f64>,
    /// NULL while the trip is still open.
    pub end_time: Option<NaiveDateTime>,
    pub end_lat: Option<f64>,
    pub end_lng: Option<f64>,
    pub distance_meters: Option<f64>,
}

#[derive(Debug, Clone, FromRow)]
pub struct TripPointRow {
    pub point_id: i64,
    pub trip_id: Uuid,
    pub device_id: String,
    pub timestamp: NaiveDateTime,
    pub lat: f64,
    pub lng: f64,
    pub speed: Option<f64>,
    pub heading: Option<f64>,
}

#[derive(Debug, Clone, FromRow)]
pub struct TripAlertRow {
    pub alert_id: Uuid,
    pub trip_id: Uuid,
    pub timestamp: NaiveDateTime,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub alert_type: String,
    pub severity: Option<i16>,
    pub metadata: Option<Json<Value>>,
}

#[derive(Debug, Clone, FromRow)]
pub struct GeofenceRow {
    pub geofence_id: Uuid,
    pub organization_id: String,
    pub name: String,
    pub geofence_type: String,
    pub metadata: Json<Value>,
    pub is_active: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}
