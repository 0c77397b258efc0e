use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::{json, Value};
use sqlx::types::Json;
use tracing::info;
use uuid::Uuid;

use super::queries;
use super::rows::GeofenceRow;
use super::{DbPool, GeofenceRepository};
use crate::error::SourceError;
use crate::geofence;
use crate::models::{Geofence, GeofenceDraft, GeofenceGeometry};

/// Stores geofences as a `geofence_type` discriminant plus a jsonb
/// `metadata` column holding the variant payload.
#[derive(Clone)]
pub struct PgGeofenceRepository {
    pool: DbPool,
}

impl PgGeofenceRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

/// Splits a geometry into its stored `(type, metadata)` pair.
fn to_columns(geometry: &GeofenceGeometry) -> Result<(&'static str, Value), SourceError> {
    let mut value = serde_json::to_value(geometry).map_err(|e| SourceError::Decode(e.to_string()))?;
    let metadata = value
        .get_mut("metadata")
        .map(Value::take)
        .ok_or_else(|| SourceError::Decode("geometry serialized without metadata".to_string()))?;
    Ok((geometry.kind(), metadata))
}

pub(crate) fn geofence_from_row(row: GeofenceRow) -> Result<Geofence, SourceError> {
    let tagged = json!({ "type": row.geofence_type, "metadata": row.metadata.0 });
    let geometry: GeofenceGeometry = serde_json::from_value(tagged)
        .map_err(|e| SourceError::Decode(format!("geofence {}: {}", row.geofence_id, e)))?;
    geofence::validate(&geometry)?;

    Ok(Geofence {
        id: row.geofence_id,
        organization_id: row.organization_id,
        name: row.name,
        geometry,
        is_active: row.is_active,
        created_at: row.created_at.and_utc(),
        updated_at: row.updated_at.and_utc(),
    })
}

impl GeofenceRepository for PgGeofenceRepository {
    fn create<'a>(&'a self, draft: &'a GeofenceDraft) -> BoxFuture<'a, Result<Geofence, SourceError>> {
        async move {
            let geometry = geofence::normalize(draft.geometry.clone())?;
            let (kind, metadata) = to_columns(&geometry)?;
            let row: GeofenceRow = sqlx::query_as(queries::INSERT_GEOFENCE)
                .bind(Uuid::new_v4())
                .bind(&draft.organization_id)
                .bind(&draft.name)
                .bind(kind)
                .bind(Json(metadata))
                .fetch_one(&self.pool)
                .await?;
            info!("Created {} geofence {} ({})", kind, row.geofence_id, row.name);
            geofence_from_row(row)
        }
        .boxed()
    }

    fn update<'a>(
        &'a self,
        id: Uuid,
        name: &'a str,
        geometry: &'a GeofenceGeometry,
    ) -> BoxFuture<'a, Result<Geofence, SourceError>> {
        async move {
            let geometry = geofence::normalize(geometry.clone())?;
            let (kind, metadata) = to_columns(&geometry)?;
            let row: Option<GeofenceRow> = sqlx::query_as(queries::UPDATE_GEOFENCE)
                .bind(id)
                .bind(name)
                .bind(kind)
                .bind(Json(metadata))
                .fetch_optional(&self.pool)
                .await?;
            geofence_from_row(row.ok_or(SourceError::NotFound(id))?)
        }
        .boxed()
    }

    fn delete(&self, id: Uuid) -> BoxFuture<'_, Result<(), SourceError>> {
        async move {
            let result = sqlx::query(queries::DELETE_GEOFENCE)
                .bind(id)
                .execute(&self.pool)
                .await?;
            if result.rows_affected() == 0 {
                return Err(SourceError::NotFound(id));
            }
            info!("Deleted geofence {}", id);
            Ok(())
        }
        .boxed()
    }

    fn list<'a>(&'a self, org_id: &'a str) -> BoxFuture<'a, Result<Vec<Geofence>, SourceError>> {
        async move {
            let rows: Vec<GeofenceRow> = sqlx::query_as(queries::SELECT_GEOFENCES_FOR_ORG)
                .bind(org_id)
                .fetch_all(&self.pool)
                .await?;
            rows.into_iter().map(geofence_from_row).collect()
        }
        .boxed()
    }

    fn set_active(&self, id: Uuid, active: bool) -> BoxFuture<'_, Result<Geofence, SourceError>> {
        async move {
            let row: Option<GeofenceRow> = sqlx::query_as(queries::SET_GEOFENCE_ACTIVE)
                .bind(id)
                .bind(active)
                .fetch_optional(&self.pool)
                .await?;
            geofence_from_row(row.ok_or(SourceError::NotFound(id))?)
        }
        .boxed()
    }
}
