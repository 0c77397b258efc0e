use anyhow::Result;
use chrono::NaiveDate;
use futures::future::BoxFuture;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use uuid::Uuid;

use crate::error::SourceError;
use crate::models::{DeviceTrips, Geofence, GeofenceDraft, GeofenceGeometry, Vehicle};

pub mod geofences;
pub mod queries;
pub mod rows;
pub mod trips;
pub mod vehicles;

pub use geofences::PgGeofenceRepository;
pub use trips::PgTripSource;
pub use vehicles::PgVehicleSource;

pub type DbPool = Pool<Postgres>;

pub async fn init_pool(database_url: &str) -> Result<DbPool> {
    let pool = PgPoolOptions::new()
        .max_connections(20)
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// Supplies the vehicles of an organization together with their last known
/// telemetry.
pub trait VehicleSource: Send + Sync {
    fn fetch_vehicles<'a>(&'a self, org_id: &'a str) -> BoxFuture<'a, Result<Vec<Vehicle>, SourceError>>;
}

/// Supplies the trips one device made on one day.
pub trait TripSource: Send + Sync {
    fn fetch_trips<'a>(
        &'a self,
        device_id: &'a str,
        date: NaiveDate,
    ) -> BoxFuture<'a, Result<DeviceTrips, SourceError>>;
}

/// Geofence persistence. Geometry is validated before anything is stored.
pub trait GeofenceRepository: Send + Sync {
    fn create<'a>(&'a self, draft: &'a GeofenceDraft) -> BoxFuture<'a, Result<Geofence, SourceError>>;

    fn update<'a>(
        &'a self,
        id: Uuid,
        name: &'a str,
        geometry: &'a GeofenceGeometry,
    ) -> BoxFuture<'a, Result<Geofence, SourceError>>;

    fn delete(&self, id: Uuid) -> BoxFuture<'_, Result<(), SourceError>>;

    fn list<'a>(&'a self, org_id: &'a str) -> BoxFuture<'a, Result<Vec<Geofence>, SourceError>>;

    fn set_active(&self, id: Uuid, active: bool) -> BoxFuture<'_, Result<Geofence, SourceError>>;
}
