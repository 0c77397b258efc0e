use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::geo::LatLon;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TripStatus {
    #[serde(alias = "moving")]
    Driving,
    #[serde(alias = "idling", alias = "stopped")]
    Idle,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub speed: f64,
    #[serde(default)]
    pub direction: f64,
    pub timestamp: DateTime<Utc>,
}

impl Position {
    pub fn coords(&self) -> LatLon {
        LatLon::new(self.latitude, self.longitude)
    }
}

/// Incident flagged by the device during a trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TripIncident {
    #[serde(rename = "type")]
    pub kind: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    /// References to media captured around the incident.
    #[serde(default)]
    pub media: Vec<String>,
}

/// A trip as returned by the trip service. Never modified after fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trip {
    pub status: TripStatus,
    /// Kilometres.
    #[serde(default)]
    pub distance: f64,
    /// Human readable duration, `HH:MM:SS`.
    #[serde(default)]
    pub trip_time: String,
    /// Epoch seconds.
    #[serde(default)]
    pub start: i64,
    #[serde(default)]
    pub end: i64,
    pub start_data_time: DateTime<Utc>,
    pub end_data_time: DateTime<Utc>,
    #[serde(default)]
    pub positions: Vec<Position>,
    #[serde(default)]
    pub events: Vec<TripIncident>,
}

impl Trip {
    /// Duration from the epoch bounds, then the ISO bounds, then `trip_time`.
    /// Bounds too far apart to represent are skipped, never a panic.
    pub fn duration(&self) -> Option<Duration> {
        if self.end > self.start && self.start > 0 {
            if let Some(span) = Duration::try_seconds(self.end - self.start) {
                return Some(span);
            }
        }
        let span = self.end_data_time - self.start_data_time;
        if span > Duration::zero() {
            return Some(span);
        }
        parse_trip_time(&self.trip_time)
    }

    pub fn is_idle(&self) -> bool {
        self.status == TripStatus::Idle
    }
}

/// Parses `HH:MM:SS` (hours may exceed 24).
pub fn parse_trip_time(value: &str) -> Option<Duration> {
    let mut parts = value.trim().split(':');
    let hours: i64 = parts.next()?.trim().parse().ok()?;
    let minutes: i64 = parts.next()?.trim().parse().ok()?;
    let seconds: i64 = parts.next().map_or(Some(0), |s| s.trim().parse().ok())?;
    if parts.next().is_some() || hours < 0 || !(0..60).contains(&minutes) || !(0..60).contains(&seconds) {
        return None;
    }
    let total = hours
        .checked_mul(3600)?
        .checked_add(minutes * 60 + seconds)?;
    Duration::try_seconds(total)
}

pub fn format_trip_time(duration: Duration) -> String {
    let total = duration.num_seconds().max(0);
    format!("{:02}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
}

/// Trips of one device for one day, as delivered by the trip collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceTrips {
    pub device_id: String,
    pub trips: Vec<Trip>,
}
