use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::geo::LatLon;
use crate::models::vehicle::MotionStatus;

/// Last known live state of a tracking device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceTelemetry {
    pub device_id: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub speed: f64,
    /// Heading in whole degrees, 0..=359.
    #[serde(default)]
    pub direction: u16,
    #[serde(default)]
    pub ignition: bool,
    #[serde(default)]
    pub movement: bool,
    #[serde(default)]
    pub battery: f64,
    pub timestamp: DateTime<Utc>,
}

impl DeviceTelemetry {
    /// Returns a new record with every field present in `delta` overwritten.
    /// Fields the delta does not mention keep their current values.
    pub fn merged(&self, delta: &TelemetryDelta) -> DeviceTelemetry {
        DeviceTelemetry {
            device_id: self.device_id.clone(),
            latitude: delta.latitude.unwrap_or(self.latitude),
            longitude: delta.longitude.unwrap_or(self.longitude),
            speed: delta.speed.unwrap_or(self.speed),
            direction: delta.direction.unwrap_or(self.direction),
            ignition: delta.ignition.unwrap_or(self.ignition),
            movement: delta.movement.unwrap_or(self.movement),
            battery: delta.battery.unwrap_or(self.battery),
            timestamp: delta.timestamp.unwrap_or(self.timestamp),
        }
    }

    pub fn status(&self) -> MotionStatus {
        MotionStatus::from_flags(self.ignition, self.movement)
    }

    pub fn position(&self) -> LatLon {
        LatLon::new(self.latitude, self.longitude)
    }
}

/// Partial device update as delivered by the telemetry channel.
///
/// Only `device_id` is mandatory. Devices report numbers as strings more
/// often than not, so every numeric field accepts either representation and
/// treats a blank string as absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryDelta {
    #[serde(
        alias = "device_id",
        alias = "DEVICE_ID",
        deserialize_with = "parse_device_id"
    )]
    pub device_id: String,
    #[serde(
        default,
        alias = "lat",
        alias = "LATITUD",
        deserialize_with = "parse_f64_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub latitude: Option<f64>,
    #[serde(
        default,
        alias = "lng",
        alias = "lon",
        alias = "LONGITUD",
        deserialize_with = "parse_f64_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub longitude: Option<f64>,
    #[serde(
        default,
        alias = "SPEED",
        deserialize_with = "parse_f64_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub speed: Option<f64>,
    #[serde(
        default,
        alias = "heading",
        alias = "course",
        alias = "COURSE",
        deserialize_with = "parse_heading_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub direction: Option<u16>,
    #[serde(
        default,
        deserialize_with = "parse_bool_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub ignition: Option<bool>,
    #[serde(
        default,
        deserialize_with = "parse_bool_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub movement: Option<bool>,
    #[serde(
        default,
        deserialize_with = "parse_f64_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub battery: Option<f64>,
    #[serde(
        default,
        alias = "GPS_DATETIME",
        deserialize_with = "parse_timestamp_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<DateTime<Utc>>,
}

impl TelemetryDelta {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            ..Default::default()
        }
    }
}

/// Folds any heading into whole degrees 0..=359.
pub fn normalize_heading(degrees: f64) -> u16 {
    (degrees.round().rem_euclid(360.0) as u16) % 360
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrFloat {
    String(String),
    Float(f64),
}

fn parse_device_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrInt {
        String(String),
        Int(u64),
    }

    match StringOrInt::deserialize(deserializer)? {
        StringOrInt::String(s) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        StringOrInt::String(_) => Err(serde::de::Error::custom("device id is blank")),
        StringOrInt::Int(n) => Ok(n.to_string()),
    }
}

fn parse_f64_option<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let v: Option<StringOrFloat> = Option::deserialize(deserializer)?;
    match v {
        Some(StringOrFloat::Float(f)) => Ok(Some(f)),
        Some(StringOrFloat::String(s)) => {
            if s.trim().is_empty() {
                Ok(None)
            } else {
                s.trim()
                    .parse::<f64>()
                    .map(Some)
                    .map_err(serde::de::Error::custom)
            }
        }
        None => Ok(None),
    }
}

fn parse_heading_option<'de, D>(deserializer: D) -> Result<Option<u16>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(parse_f64_option(deserializer)?.map(normalize_heading))
}

fn parse_bool_option<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
        String(String),
    }

    let v: Option<Flag> = Option::deserialize(deserializer)?;
    match v {
        Some(Flag::Bool(b)) => Ok(Some(b)),
        Some(Flag::Int(n)) => Ok(Some(n != 0)),
        Some(Flag::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "" => Ok(None),
            "1" | "true" | "on" | "yes" => Ok(Some(true)),
            "0" | "false" | "off" | "no" => Ok(Some(false)),
            other => Err(serde::de::Error::custom(format!("invalid flag: {}", other))),
        },
        None => Ok(None),
    }
}

fn parse_timestamp_option<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let v: Option<StringOrFloat> = Option::deserialize(deserializer)?;
    match v {
        Some(StringOrFloat::Float(epoch)) => Ok(epoch_to_datetime(epoch)),
        Some(StringOrFloat::String(s)) => {
            let s = s.trim();
            if s.is_empty() {
                return Ok(None);
            }
            if let Ok(t) = DateTime::parse_from_rfc3339(s) {
                return Ok(Some(t.with_timezone(&Utc)));
            }
            for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
                if let Ok(t) = NaiveDateTime::parse_from_str(s, format) {
                    return Ok(Some(t.and_utc()));
                }
            }
            match s.parse::<f64>() {
                Ok(epoch) => Ok(epoch_to_datetime(epoch)),
                Err(_) => Err(serde::de::Error::custom(format!(
                    "invalid timestamp: '{}'",
                    s
                ))),
            }
        }
        None => Ok(None),
    }
}

/// Epoch values above 1e11 are taken as milliseconds, anything else as seconds.
fn epoch_to_datetime(epoch: f64) -> Option<DateTime<Utc>> {
    let millis = if epoch.abs() > 1e11 { epoch } else { epoch * 1000.0 };
    Utc.timestamp_millis_opt(millis as i64).single()
}
