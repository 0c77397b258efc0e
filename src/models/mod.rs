pub mod geofence;
pub mod telemetry;
pub mod timeline;
pub mod trip;
pub mod vehicle;
pub mod wire;

pub use geofence::{Geofence, GeofenceDraft, GeofenceGeometry};
pub use telemetry::{DeviceTelemetry, TelemetryDelta};
pub use timeline::{AlertReason, Severity, TimelineEvent, TimelineKind};
pub use trip::{DeviceTrips, Position, Trip, TripIncident, TripStatus};
pub use vehicle::{EntityType, MotionStatus, Vehicle};
