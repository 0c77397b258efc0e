use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::error::StoreError;
use crate::geofence::{GeofenceCrossing, GeofenceMonitor, Transition};
use crate::models::{Geofence, TelemetryDelta};
use crate::store::VehicleStore;

/// Single writer of the vehicle store. Deltas are applied in the order they
/// come off the queue and each positional update is checked against the
/// active geofences.
pub struct TelemetryProcessor {
    store: VehicleStore,
    geofences: Vec<Geofence>,
    monitor: GeofenceMonitor,
}

impl TelemetryProcessor {
    pub fn new(store: VehicleStore, geofences: Vec<Geofence>) -> Self {
        Self {
            store,
            geofences,
            monitor: GeofenceMonitor::new(),
        }
    }

    pub fn store(&self) -> &VehicleStore {
        &self.store
    }

    /// Applies one delta and returns the geofence crossings it caused.
    pub fn process(&mut self, delta: &TelemetryDelta) -> Vec<GeofenceCrossing> {
        let vehicle = match self.store.apply_delta(delta) {
            Ok(vehicle) => vehicle,
            Err(StoreError::UnknownDevice(device_id)) => {
                debug!("Dropping delta for untracked device {}", device_id);
                return Vec::new();
            }
        };

        if delta.latitude.is_none() && delta.longitude.is_none() {
            return Vec::new();
        }
        let Some(device) = vehicle.device.as_ref() else {
            return Vec::new();
        };

        let crossings = self
            .monitor
            .observe(&device.device_id, device.position(), &self.geofences);
        for crossing in &crossings {
            let verb = match crossing.transition {
                Transition::Enter => "entered",
                Transition::Exit => "left",
            };
            info!(
                "Vehicle {} ({}) {} geofence {} at {:.5},{:.5}",
                vehicle.name,
                crossing.device_id,
                verb,
                crossing.geofence_name,
                crossing.position.lat,
                crossing.position.lon
            );
        }
        crossings
    }

    pub fn log_summary(&self) {
        let counts = self.store.status_counts();
        info!(
            "Fleet status: {} driving, {} idling, {} parking, {} untracked",
            counts.driving, counts.idling, counts.parking, counts.untracked
        );
    }

    /// Drains the queue until every sender is gone, logging a status
    /// summary every `summary_every`. The queue is unbounded: deltas are
    /// partial, so every one of them has to reach the store. Returns the
    /// processor so the caller can inspect the final state.
    pub async fn run(
        mut self,
        mut deltas: mpsc::UnboundedReceiver<TelemetryDelta>,
        summary_every: Duration,
    ) -> Self {
        let mut ticker = tokio::time::interval(summary_every);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                delta = deltas.recv() => match delta {
                    Some(delta) => {
                        self.process(&delta);
                    }
                    None => break,
                },
                _ = ticker.tick() => self.log_summary(),
            }
        }

        info!("Telemetry queue closed, processor stopping");
        self.log_summary();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::LatLon;
    use crate::models::{DeviceTelemetry, EntityType, GeofenceGeometry, MotionStatus, Vehicle};
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    fn vehicle(id: &str, device_id: &str) -> Vehicle {
        Vehicle {
            id: id.to_string(),
            organization_id: "org-1".to_string(),
            name: format!("Unit {}", id),
            entity_type: EntityType::Vehicle,
            device: Some(DeviceTelemetry {
                device_id: device_id.to_string(),
                latitude: 10.0,
                longitude: 10.0,
                speed: 0.0,
                direction: 0,
                ignition: false,
                movement: false,
                battery: 12.0,
                timestamp: Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap(),
            }),
        }
    }

    fn depot() -> Geofence {
        let at = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        Geofence {
            id: Uuid::new_v4(),
            organization_id: "org-1".to_string(),
            name: "Depot".to_string(),
            geometry: GeofenceGeometry::circle(LatLon::new(0.0, 0.0), 1.0),
            is_active: true,
            created_at: at,
            updated_at: at,
        }
    }

    fn processor() -> TelemetryProcessor {
        let mut store = VehicleStore::new();
        store.load(vec![vehicle("v1", "d1")]);
        TelemetryProcessor::new(store, vec![depot()])
    }

    fn moved(lat: f64, lon: f64) -> TelemetryDelta {
        TelemetryDelta {
            latitude: Some(lat),
            longitude: Some(lon),
            ..TelemetryDelta::new("d1")
        }
    }

    #[test]
    fn test_positional_deltas_report_enter_and_exit() {
        let mut processor = processor();

        let crossings = processor.process(&moved(0.001, 0.001));
        assert_eq!(crossings.len(), 1);
        assert_eq!(crossings[0].transition, Transition::Enter);
        assert_eq!(crossings[0].geofence_name, "Depot");

        assert!(processor.process(&moved(0.002, 0.0)).is_empty());

        let crossings = processor.process(&moved(0.5, 0.5));
        assert_eq!(crossings.len(), 1);
        assert_eq!(crossings[0].transition, Transition::Exit);
    }

    #[test]
    fn test_non_positional_delta_skips_geofences() {
        let mut processor = processor();
        processor.process(&moved(0.0, 0.0));

        let crossings = processor.process(&TelemetryDelta {
            ignition: Some(true),
            ..TelemetryDelta::new("d1")
        });
        assert!(crossings.is_empty());
        assert_eq!(processor.store().status("v1"), Some(MotionStatus::Idling));
    }

    #[test]
    fn test_unknown_device_is_ignored() {
        let mut processor = processor();
        assert!(processor
            .process(&TelemetryDelta {
                latitude: Some(0.0),
                longitude: Some(0.0),
                ..TelemetryDelta::new("ghost")
            })
            .is_empty());
        assert_eq!(processor.store().len(), 1);
    }

    #[tokio::test]
    async fn test_run_applies_queue_in_order() {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(processor().run(rx, Duration::from_secs(3600)));

        tx.send(TelemetryDelta {
            speed: Some(35.0),
            ..TelemetryDelta::new("d1")
        })
        .unwrap();
        tx.send(TelemetryDelta {
            speed: Some(50.0),
            ignition: Some(true),
            movement: Some(true),
            ..TelemetryDelta::new("d1")
        })
        .unwrap();
        drop(tx);

        let processor = worker.await.unwrap();
        let device = processor.store().get("v1").unwrap().device.clone().unwrap();
        assert_eq!(device.speed, 50.0);
        assert_eq!(processor.store().status("v1"), Some(MotionStatus::Driving));
    }

    #[tokio::test]
    async fn test_burst_keeps_every_delta() {
        let (tx, rx) = mpsc::unbounded_channel();

        // Queued before the worker starts, so nothing drains in between.
        tx.send(TelemetryDelta {
            ignition: Some(true),
            movement: Some(true),
            ..TelemetryDelta::new("d1")
        })
        .unwrap();
        for i in 0..5000 {
            tx.send(TelemetryDelta {
                speed: Some(i as f64),
                ..TelemetryDelta::new("d1")
            })
            .unwrap();
        }
        tx.send(TelemetryDelta {
            ignition: Some(false),
            ..TelemetryDelta::new("d1")
        })
        .unwrap();
        drop(tx);

        let processor = processor().run(rx, Duration::from_secs(3600)).await;
        let device = processor.store().get("v1").unwrap().device.clone().unwrap();
        assert_eq!(device.speed, 4999.0);
        assert_eq!(processor.store().status("v1"), Some(MotionStatus::Parking));
    }
}
