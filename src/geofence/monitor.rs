use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

use crate::geo::LatLon;
use crate::models::Geofence;

use super::contains;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transition {
    Enter,
    Exit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeofenceCrossing {
    pub device_id: String,
    pub geofence_id: Uuid,
    pub geofence_name: String,
    pub transition: Transition,
    pub position: LatLon,
}

/// Remembers which active geofences each device is inside and reports
/// boundary crossings as new positions arrive.
#[derive(Debug, Default)]
pub struct GeofenceMonitor {
    inside: HashSet<(String, Uuid)>,
}

impl GeofenceMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// A device first seen inside a geofence reports `Enter`. Inactive
    /// geofences are ignored and their state for this device is dropped
    /// without reporting an exit.
    pub fn observe(
        &mut self,
        device_id: &str,
        position: LatLon,
        geofences: &[Geofence],
    ) -> Vec<GeofenceCrossing> {
        let active: HashSet<Uuid> = geofences
            .iter()
            .filter(|g| g.is_active)
            .map(|g| g.id)
            .collect();
        self.inside
            .retain(|(device, id)| device != device_id || active.contains(id));

        let mut crossings = Vec::new();
        for geofence in geofences.iter().filter(|g| g.is_active) {
            let key = (device_id.to_string(), geofence.id);
            let was_inside = self.inside.contains(&key);
            let is_inside = contains(&geofence.geometry, position);

            let transition = match (was_inside, is_inside) {
                (false, true) => {
                    self.inside.insert(key);
                    Transition::Enter
                }
                (true, false) => {
                    self.inside.remove(&key);
                    Transition::Exit
                }
                _ => continue,
            };
            crossings.push(GeofenceCrossing {
                device_id: device_id.to_string(),
                geofence_id: geofence.id,
                geofence_name: geofence.name.clone(),
                transition,
                position,
            });
        }
        crossings
    }

    pub fn is_inside(&self, device_id: &str, geofence_id: Uuid) -> bool {
        self.inside.contains(&(device_id.to_string(), geofence_id))
    }

    pub fn forget_device(&mut self, device_id: &str) {
        self.inside.retain(|(device, _)| device != device_id);
    }
}
