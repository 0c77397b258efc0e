//! Live fleet tracking core: telemetry subscriptions, the vehicle state
//! store, geofence geometry and trip timelines.

pub mod channel;
pub mod config;
pub mod db;
pub mod error;
pub mod geo;
pub mod geofence;
pub mod models;
pub mod processor;
pub mod store;
pub mod subscription;
pub mod timeline;

pub use error::{ChannelError, GeometryError, SourceError, StoreError};
pub use store::VehicleStore;
pub use subscription::{Interest, SubscriptionManager, UpdateSubscription};
pub use timeline::{build_timeline, TimelineConfig};
