//! Canonical in-memory vehicle collection.
//!
//! The store has a single writer. Deltas are merged field by field in the
//! order they are handed in; payload timestamps are never used to reorder.

use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::models::{MotionStatus, TelemetryDelta, Vehicle};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub driving: usize,
    pub idling: usize,
    pub parking: usize,
    pub untracked: usize,
}

#[derive(Debug, Default, Clone)]
pub struct VehicleStore {
    vehicles: Vec<Vehicle>,
    by_id: HashMap<String, usize>,
    by_device: HashMap<String, usize>,
}

impl VehicleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole collection. When two vehicles claim the same
    /// device the first one keeps it; the second is kept but receives no
    /// deltas.
    pub fn load(&mut self, vehicles: Vec<Vehicle>) {
        let mut by_id = HashMap::with_capacity(vehicles.len());
        let mut by_device = HashMap::with_capacity(vehicles.len());

        for (index, vehicle) in vehicles.iter().enumerate() {
            by_id.entry(vehicle.id.clone()).or_insert(index);
            if let Some(device_id) = vehicle.device_id() {
                if let Some(owner) = by_device.get(device_id) {
                    let owner: &Vehicle = &vehicles[*owner];
                    warn!(
                        "Device {} already owned by vehicle {}, ignoring it for vehicle {}",
                        device_id, owner.id, vehicle.id
                    );
                    continue;
                }
                by_device.insert(device_id.to_string(), index);
            }
        }

        debug!(
            "Loaded {} vehicles ({} trackable)",
            vehicles.len(),
            by_device.len()
        );
        self.vehicles = vehicles;
        self.by_id = by_id;
        self.by_device = by_device;
    }

    /// Merges a delta into the vehicle owning `delta.device_id` and returns
    /// the new record. Unknown devices leave the store untouched.
    pub fn apply_delta(&mut self, delta: &TelemetryDelta) -> Result<&Vehicle, StoreError> {
        let index = *self
            .by_device
            .get(&delta.device_id)
            .ok_or_else(|| StoreError::UnknownDevice(delta.device_id.clone()))?;

        let current = &self.vehicles[index];
        let device = match &current.device {
            Some(device) => device.merged(delta),
            None => return Err(StoreError::UnknownDevice(delta.device_id.clone())),
        };
        self.vehicles[index] = current.with_device(device);
        Ok(&self.vehicles[index])
    }

    /// Derived on every call from the current telemetry.
    pub fn status(&self, vehicle_id: &str) -> Option<MotionStatus> {
        self.get(vehicle_id).and_then(Vehicle::status)
    }

    pub fn get(&self, vehicle_id: &str) -> Option<&Vehicle> {
        self.by_id.get(vehicle_id).map(|&i| &self.vehicles[i])
    }

    pub fn find_by_device(&self, device_id: &str) -> Option<&Vehicle> {
        self.by_device.get(device_id).map(|&i| &self.vehicles[i])
    }

    pub fn filter<P>(&self, predicate: P) -> Vec<&Vehicle>
    where
        P: Fn(&Vehicle) -> bool,
    {
        self.vehicles.iter().filter(|v| predicate(*v)).collect()
    }

    pub fn vehicles(&self) -> &[Vehicle] {
        &self.vehicles
    }

    pub fn len(&self) -> usize {
        self.vehicles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vehicles.is_empty()
    }

    /// Device ids that can receive deltas, in collection order.
    pub fn device_ids(&self) -> Vec<String> {
        self.vehicles
            .iter()
            .enumerate()
            .filter_map(|(index, v)| {
                let device_id = v.device_id()?;
                (self.by_device.get(device_id) == Some(&index)).then(|| device_id.to_string())
            })
            .collect()
    }

    pub fn status_counts(&self) -> StatusCounts {
        self.vehicles
            .iter()
            .fold(StatusCounts::default(), |mut counts, v| {
                match v.status() {
                    Some(MotionStatus::Driving) => counts.driving += 1,
                    Some(MotionStatus::Idling) => counts.idling += 1,
                    Some(MotionStatus::Parking) => counts.parking += 1,
                    None => counts.untracked += 1,
                }
                counts
            })
    }
}
