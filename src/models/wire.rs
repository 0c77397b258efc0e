//! Protobuf frames published by the telemetry gateway.
//!
//! Schema lives in `proto/fleet.proto`; the structs are declared with the
//! prost derive so no code generation step is needed.

use chrono::{TimeZone, Utc};

use crate::models::telemetry::{normalize_heading, TelemetryDelta};

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeviceUpdate {
    #[prost(string, tag = "1")]
    pub device_id: ::prost::alloc::string::String,
    #[prost(double, optional, tag = "2")]
    pub latitude: ::core::option::Option<f64>,
    #[prost(double, optional, tag = "3")]
    pub longitude: ::core::option::Option<f64>,
    #[prost(double, optional, tag = "4")]
    pub speed: ::core::option::Option<f64>,
    #[prost(uint32, optional, tag = "5")]
    pub direction: ::core::option::Option<u32>,
    #[prost(bool, optional, tag = "6")]
    pub ignition: ::core::option::Option<bool>,
    #[prost(bool, optional, tag = "7")]
    pub movement: ::core::option::Option<bool>,
    #[prost(double, optional, tag = "8")]
    pub battery: ::core::option::Option<f64>,
    #[prost(int64, optional, tag = "9")]
    pub timestamp_ms: ::core::option::Option<i64>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeviceUpdateBatch {
    /// Channel event name, e.g. `getDevicesLocationUpdates`.
    #[prost(string, tag = "1")]
    pub event: ::prost::alloc::string::String,
    #[prost(message, repeated, tag = "2")]
    pub updates: ::prost::alloc::vec::Vec<DeviceUpdate>,
}

impl From<DeviceUpdate> for TelemetryDelta {
    fn from(update: DeviceUpdate) -> Self {
        TelemetryDelta {
            device_id: update.device_id,
            latitude: update.latitude,
            longitude: update.longitude,
            speed: update.speed,
            direction: update.direction.map(|d| normalize_heading(d as f64)),
            ignition: update.ignition,
            movement: update.movement,
            battery: update.battery,
            timestamp: update
                .timestamp_ms
                .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn test_decoded_update_keeps_absent_fields_absent() {
        let batch = DeviceUpdateBatch {
            event: "getDeviceUpdate".to_string(),
            updates: vec![DeviceUpdate {
                device_id: "dev-7".to_string(),
                direction: Some(400),
                ignition: Some(true),
                timestamp_ms: Some(1_764_396_915_000),
                ..Default::default()
            }],
        };
        let bytes = batch.encode_to_vec();

        let decoded = DeviceUpdateBatch::decode(bytes.as_slice()).unwrap();
        let delta = TelemetryDelta::from(decoded.updates[0].clone());
        assert_eq!(delta.device_id, "dev-7");
        assert_eq!(delta.direction, Some(40));
        assert_eq!(delta.ignition, Some(true));
        assert_eq!(delta.movement, None);
        assert_eq!(delta.latitude, None);
        assert_eq!(delta.timestamp.map(|t| t.timestamp()), Some(1_764_396_915));
    }
}
