use chrono::{Duration, NaiveDate, NaiveTime};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

use super::queries;
use super::rows::{TripAlertRow, TripPointRow, TripRow};
use super::{DbPool, TripSource};
use crate::error::SourceError;
use crate::geo::haversine_km;
use crate::models::trip::format_trip_time;
use crate::models::{DeviceTrips, Position, Trip, TripIncident, TripStatus};

/// Reads the trips the ignition-driven trip service wrote, with their
/// points and alerts.
#[derive(Clone)]
pub struct PgTripSource {
    pool: DbPool,
}

impl PgTripSource {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

impl TripSource for PgTripSource {
    fn fetch_trips<'a>(
        &'a self,
        device_id: &'a str,
        date: NaiveDate,
    ) -> BoxFuture<'a, Result<DeviceTrips, SourceError>> {
        async move {
            let from = date.and_time(NaiveTime::MIN);
            let to = from
                .checked_add_signed(Duration::days(1))
                .ok_or_else(|| SourceError::Decode(format!("date {} out of range", date)))?;

            let trips: Vec<TripRow> = sqlx::query_as(queries::SELECT_TRIPS_FOR_DAY)
                .bind(device_id)
                .bind(from)
                .bind(to)
                .fetch_all(&self.pool)
                .await?;
            if trips.is_empty() {
                return Ok(DeviceTrips {
                    device_id: device_id.to_string(),
                    trips: Vec::new(),
                });
            }

            let ids: Vec<Uuid> = trips.iter().map(|t| t.trip_id).collect();
            let points: Vec<TripPointRow> = sqlx::query_as(queries::SELECT_TRIP_POINTS)
                .bind(&ids)
                .fetch_all(&self.pool)
                .await?;
            let alerts: Vec<TripAlertRow> = sqlx::query_as(queries::SELECT_TRIP_ALERTS)
                .bind(&ids)
                .fetch_all(&self.pool)
                .await?;
            debug!(
                "Device {} on {}: {} trips, {} points, {} alerts",
                device_id,
                date,
                trips.len(),
                points.len(),
                alerts.len()
            );

            let mut points_by_trip: HashMap<Uuid, Vec<TripPointRow>> = HashMap::new();
            for point in points {
                points_by_trip.entry(point.trip_id).or_default().push(point);
            }
            let mut alerts_by_trip: HashMap<Uuid, Vec<TripAlertRow>> = HashMap::new();
            for alert in alerts {
                alerts_by_trip.entry(alert.trip_id).or_default().push(alert);
            }

            let trips = trips
                .into_iter()
                .map(|row| {
                    let points = points_by_trip.remove(&row.trip_id).unwrap_or_default();
                    let alerts = alerts_by_trip.remove(&row.trip_id).unwrap_or_default();
                    assemble_trip(row, points, alerts)
                })
                .collect();

            Ok(DeviceTrips {
                device_id: device_id.to_string(),
                trips,
            })
        }
        .boxed()
    }
}

/// Builds a [`Trip`] from its rows. Open trips end at their last point and
/// count as driving; closed trips that covered no distance are idle.
pub fn assemble_trip(row: TripRow, mut points: Vec<TripPointRow>, alerts: Vec<TripAlertRow>) -> Trip {
    points.sort_by_key(|p| (p.timestamp, p.point_id));
    let positions: Vec<Position> = points
        .iter()
        .map(|p| Position {
            latitude: p.lat,
            longitude: p.lng,
            speed: p.speed.unwrap_or(0.0),
            direction: p.heading.unwrap_or(0.0),
            timestamp: p.timestamp.and_utc(),
        })
        .collect();

    let distance = match row.distance_meters {
        Some(meters) => meters / 1000.0,
        None => positions
            .windows(2)
            .map(|w| haversine_km(w[0].coords(), w[1].coords()))
            .sum(),
    };

    let start_data_time = row.start_time.and_utc();
    let end_data_time = row
        .end_time
        .map(|t| t.and_utc())
        .or_else(|| positions.last().map(|p| p.timestamp))
        .unwrap_or(start_data_time)
        .max(start_data_time);

    let status = if row.end_time.is_none() || distance > 0.0 {
        TripStatus::Driving
    } else {
        TripStatus::Idle
    };

    let events = alerts
        .into_iter()
        .map(|alert| TripIncident {
            kind: alert.alert_type,
            timestamp: alert.timestamp.and_utc(),
            latitude: alert.lat,
            longitude: alert.lon,
            media: alert.metadata.map(|m| media_refs(&m.0)).unwrap_or_default(),
        })
        .collect();

    Trip {
        status,
        distance,
        trip_time: format_trip_time(end_data_time - start_data_time),
        start: start_data_time.timestamp(),
        end: end_data_time.timestamp(),
        start_data_time,
        end_data_time,
        positions,
        events,
    }
}

/// Media references an alert's metadata may carry, as a list or a single
/// string.
fn media_refs(metadata: &Value) -> Vec<String> {
    match metadata.get("media") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        Some(Value::String(single)) if !single.is_empty() => vec![single.clone()],
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;
    use serde_json::json;
    use sqlx::types::Json;

    fn ts(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, 10)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn trip_row(end: Option<NaiveDateTime>, distance_meters: Option<f64>) -> TripRow {
        TripRow {
            trip_id: Uuid::nil(),
            device_id: "d1".to_string(),
            start_time: ts(8, 0),
            start_lat: Some(19.0),
            start_lng: Some(-99.0),
            end_time: end,
            end_lat: None,
            end_lng: None,
            distance_meters,
        }
    }

    fn point(id: i64, at: NaiveDateTime, lat: f64, speed: f64) -> TripPointRow {
        TripPointRow {
            point_id: id,
            trip_id: Uuid::nil(),
            device_id: "d1".to_string(),
            timestamp: at,
            lat,
            lng: -99.0,
            speed: Some(speed),
            heading: None,
        }
    }

    #[test]
    fn test_closed_trip_with_distance_is_driving() {
        let trip = assemble_trip(
            trip_row(Some(ts(8, 30)), Some(12_500.0)),
            vec![point(2, ts(8, 20), 19.1, 50.0), point(1, ts(8, 0), 19.0, 0.0)],
            Vec::new(),
        );
        assert_eq!(trip.status, TripStatus::Driving);
        assert_eq!(trip.distance, 12.5);
        assert_eq!(trip.trip_time, "00:30:00");
        assert_eq!(trip.end - trip.start, 1800);
        assert_eq!(trip.positions[0].latitude, 19.0);
        assert_eq!(trip.positions[1].speed, 50.0);
    }

    #[test]
    fn test_closed_trip_without_distance_is_idle() {
        let trip = assemble_trip(trip_row(Some(ts(8, 12)), Some(0.0)), Vec::new(), Vec::new());
        assert!(trip.is_idle());
        assert_eq!(trip.duration(), Some(Duration::minutes(12)));
    }

    #[test]
    fn test_open_trip_ends_at_last_point() {
        let trip = assemble_trip(
            trip_row(None, None),
            vec![point(1, ts(8, 0), 19.0, 30.0), point(2, ts(8, 5), 19.01, 30.0)],
            Vec::new(),
        );
        assert_eq!(trip.status, TripStatus::Driving);
        assert_eq!(trip.end_data_time, ts(8, 5).and_utc());
        assert!((trip.distance - 1.112).abs() < 0.01);
    }

    #[test]
    fn test_alerts_become_incidents_with_media() {
        let alert = TripAlertRow {
            alert_id: Uuid::new_v4(),
            trip_id: Uuid::nil(),
            timestamp: ts(8, 10),
            lat: Some(19.05),
            lon: Some(-99.0),
            alert_type: "harsh_brake".to_string(),
            severity: Some(2),
            metadata: Some(Json(json!({"media": ["cam-front.mp4", 7]}))),
        };
        let trip = assemble_trip(trip_row(Some(ts(8, 30)), Some(1000.0)), Vec::new(), vec![alert]);
        assert_eq!(trip.events.len(), 1);
        assert_eq!(trip.events[0].kind, "harsh_brake");
        assert_eq!(trip.events[0].media, vec!["cam-front.mp4".to_string()]);
    }

    #[test]
    fn test_media_refs_accepts_single_string() {
        assert_eq!(media_refs(&json!({"media": "snap.jpg"})), vec!["snap.jpg".to_string()]);
        assert!(media_refs(&json!({"media": ""})).is_empty());
        assert!(media_refs(&json!({})).is_empty());
    }
}
