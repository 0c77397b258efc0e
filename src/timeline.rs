//! Trip timeline builder.
//!
//! Turns one device's trips for a day into the ordered list of events the
//! detail view shows: where the day started, each driving leg or stop,
//! threshold alerts, and where it ended.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use tracing::debug;

use crate::db::TripSource;
use crate::error::SourceError;
use crate::geo::LatLon;
use crate::models::{AlertReason, Position, Severity, TimelineEvent, TimelineKind, Trip, TripStatus};

#[derive(Debug, Clone, PartialEq)]
pub struct TimelineConfig {
    /// Speeds above this raise a warning.
    pub overspeed_kmh: f64,
    /// Speeds above this raise a danger alert instead.
    pub danger_speed_kmh: f64,
    /// Shorter driving trips are not checked for overspeed.
    pub min_overspeed_trip_km: f64,
    pub max_idle: Duration,
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            overspeed_kmh: 90.0,
            danger_speed_kmh: 120.0,
            min_overspeed_trip_km: 0.08,
            max_idle: Duration::minutes(5),
        }
    }
}

struct Anchor {
    time: DateTime<Utc>,
    position_index: Option<usize>,
    position: Option<LatLon>,
    speed: Option<f64>,
}

impl Anchor {
    fn at(positions: &[Position], index: usize) -> Self {
        let p = &positions[index];
        Anchor {
            time: p.timestamp,
            position_index: Some(index),
            position: Some(p.coords()),
            speed: Some(p.speed),
        }
    }

    fn first(trip: &Trip) -> Self {
        if trip.positions.is_empty() {
            Self::bare(trip.start_data_time)
        } else {
            Self::at(&trip.positions, 0)
        }
    }

    fn last(trip: &Trip) -> Self {
        match trip.positions.len() {
            0 => Self::bare(trip.end_data_time),
            n => Self::at(&trip.positions, n - 1),
        }
    }

    fn bare(time: DateTime<Utc>) -> Self {
        Anchor {
            time,
            position_index: None,
            position: None,
            speed: None,
        }
    }
}

fn event(
    kind: TimelineKind,
    trip_index: usize,
    trip: &Trip,
    anchor: Anchor,
    distance_km: f64,
) -> TimelineEvent {
    TimelineEvent {
        kind,
        time: anchor.time,
        severity: None,
        alert: None,
        trip_index,
        trip_start: trip.start_data_time,
        position_index: anchor.position_index,
        position: anchor.position,
        speed: anchor.speed,
        distance_km,
    }
}

/// Builds the timeline for a set of trips. Input order does not matter;
/// an empty slice yields an empty timeline.
pub fn build_timeline(trips: &[Trip], config: &TimelineConfig) -> Vec<TimelineEvent> {
    let mut ordered: Vec<&Trip> = trips.iter().collect();
    ordered.sort_by_key(|t| t.start_data_time);

    let (Some(first), Some(last)) = (ordered.first().copied(), ordered.last().copied()) else {
        return Vec::new();
    };

    let mut events = vec![event(TimelineKind::Start, 0, first, Anchor::first(first), 0.0)];
    let mut total_km = 0.0;

    for (index, trip) in ordered.iter().copied().enumerate() {
        total_km += trip.distance;

        if trip.is_idle() {
            let idle = trip.duration().unwrap_or_else(Duration::zero);
            if idle > config.max_idle {
                let mut alert = event(TimelineKind::Alert, index, trip, Anchor::first(trip), total_km);
                alert.severity = Some(Severity::Warning);
                alert.alert = Some(AlertReason::IdleExceeded);
                events.push(alert);
            }
        } else if trip.status == TripStatus::Driving && trip.distance > config.min_overspeed_trip_km {
            for (i, position) in trip.positions.iter().enumerate() {
                if position.speed <= config.overspeed_kmh {
                    continue;
                }
                let mut alert = event(
                    TimelineKind::Alert,
                    index,
                    trip,
                    Anchor::at(&trip.positions, i),
                    total_km,
                );
                alert.severity = Some(if position.speed > config.danger_speed_kmh {
                    Severity::Danger
                } else {
                    Severity::Warning
                });
                alert.alert = Some(AlertReason::Overspeed);
                events.push(alert);
            }
        }

        let marker = if trip.is_idle() {
            TimelineKind::Stop
        } else {
            TimelineKind::Driving
        };
        events.push(event(marker, index, trip, Anchor::last(trip), total_km));
    }

    events.push(event(
        TimelineKind::End,
        ordered.len() - 1,
        last,
        Anchor::last(last),
        total_km,
    ));

    // Stable, so events of one trip keep their emission order.
    events.sort_by_key(|e| e.trip_start);
    events
}

/// Fetches the device's trips for `date` and builds their timeline.
pub async fn timeline_for_device(
    source: &dyn TripSource,
    device_id: &str,
    date: NaiveDate,
    config: &TimelineConfig,
) -> Result<Vec<TimelineEvent>, SourceError> {
    let day = source.fetch_trips(device_id, date).await?;
    debug!(
        "Building timeline for device {} on {} from {} trips",
        day.device_id,
        date,
        day.trips.len()
    );
    Ok(build_timeline(&day.trips, config))
}
