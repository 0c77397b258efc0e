use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::telemetry::DeviceTelemetry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    #[default]
    Vehicle,
    Asset,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Vehicle => "vehicle",
            EntityType::Asset => "asset",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "vehicle" => Some(EntityType::Vehicle),
            "asset" => Some(EntityType::Asset),
            _ => None,
        }
    }
}

/// Canonical motion classification, derived from the ignition and movement
/// flags on every read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MotionStatus {
    Driving,
    Idling,
    Parking,
}

impl MotionStatus {
    /// Movement is irrelevant once the ignition is off.
    pub fn from_flags(ignition: bool, movement: bool) -> Self {
        match (ignition, movement) {
            (true, true) => MotionStatus::Driving,
            (true, false) => MotionStatus::Idling,
            (false, _) => MotionStatus::Parking,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MotionStatus::Driving => "driving",
            MotionStatus::Idling => "idling",
            MotionStatus::Parking => "parking",
        }
    }
}

impl fmt::Display for MotionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A vehicle or asset of the fleet. Without a device it is not trackable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vehicle {
    pub id: String,
    pub organization_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub entity_type: EntityType,
    #[serde(default)]
    pub device: Option<DeviceTelemetry>,
}

impl Vehicle {
    pub fn is_trackable(&self) -> bool {
        self.device.is_some()
    }

    pub fn device_id(&self) -> Option<&str> {
        self.device.as_ref().map(|d| d.device_id.as_str())
    }

    pub fn status(&self) -> Option<MotionStatus> {
        self.device.as_ref().map(DeviceTelemetry::status)
    }

    /// Copy of this vehicle owning `device` as its live telemetry.
    pub fn with_device(&self, device: DeviceTelemetry) -> Vehicle {
        Vehicle {
            device: Some(device),
            ..self.clone()
        }
    }
}
