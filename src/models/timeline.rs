use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geo::LatLon;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimelineKind {
    Start,
    Driving,
    Stop,
    Alert,
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Danger,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertReason {
    Overspeed,
    IdleExceeded,
}

/// One entry of a trip timeline. Derived on demand, never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineEvent {
    pub kind: TimelineKind,
    pub time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert: Option<AlertReason>,
    /// Index of the originating trip in start-time order.
    pub trip_index: usize,
    pub trip_start: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position_index: Option<usize>,
    /// `None` means the coordinate is unavailable, not an error.
    pub position: Option<LatLon>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    /// Cumulative kilometres up to and including the originating trip.
    pub distance_km: f64,
}
