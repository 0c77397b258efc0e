//! Bidirectional telemetry channel.
//!
//! The subscription manager talks to the outside world only through the
//! [`Channel`] trait, so it can run against Kafka in production and against
//! [`MemoryChannel`] in tests or embedded setups.

pub mod kafka;
pub mod memory;

pub use kafka::{KafkaChannel, KafkaSettings};
pub use memory::{MemoryChannel, SentMessage};

use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::ChannelError;

/// Event names understood by the telemetry gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelEvent {
    /// Raised by the channel itself after every (re)connect.
    Connect,
    /// Raised by the channel itself when the link drops.
    Disconnect,
    /// Outbound: subscribe one device.
    DeviceUpdates,
    /// Outbound: subscribe a set of devices.
    DevicesLocationUpdates,
    /// Outbound: drop a subscription.
    RemoveUpdates,
    /// Inbound: delta for a single-device subscription.
    GetDeviceUpdate,
    /// Inbound: one delta or an array of deltas for a fleet subscription.
    GetDevicesLocationUpdates,
}

impl ChannelEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelEvent::Connect => "connect",
            ChannelEvent::Disconnect => "disconnect",
            ChannelEvent::DeviceUpdates => "deviceUpdates",
            ChannelEvent::DevicesLocationUpdates => "devicesLocationUpdates",
            ChannelEvent::RemoveUpdates => "removeUpdates",
            ChannelEvent::GetDeviceUpdate => "getDeviceUpdate",
            ChannelEvent::GetDevicesLocationUpdates => "getDevicesLocationUpdates",
        }
    }
}

impl fmt::Display for ChannelEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelEvent {
    type Err = ChannelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let event = match s {
            "connect" => ChannelEvent::Connect,
            "disconnect" => ChannelEvent::Disconnect,
            "deviceUpdates" => ChannelEvent::DeviceUpdates,
            "devicesLocationUpdates" => ChannelEvent::DevicesLocationUpdates,
            "removeUpdates" => ChannelEvent::RemoveUpdates,
            "getDeviceUpdate" => ChannelEvent::GetDeviceUpdate,
            "getDevicesLocationUpdates" => ChannelEvent::GetDevicesLocationUpdates,
            other => return Err(ChannelError::Decode(format!("unknown event `{}`", other))),
        };
        Ok(event)
    }
}

/// Callback registered with [`Channel::on`].
pub type EventHandler = Arc<dyn Fn(&Value) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

pub trait Channel: Send + Sync {
    fn connect(&self) -> BoxFuture<'_, Result<(), ChannelError>>;

    fn send(&self, event: ChannelEvent, payload: Value) -> BoxFuture<'_, Result<(), ChannelError>>;

    fn on(&self, event: ChannelEvent, handler: EventHandler) -> ListenerId;

    fn off(&self, event: ChannelEvent, id: ListenerId);

    fn disconnect(&self) -> BoxFuture<'_, Result<(), ChannelError>>;

    fn is_connected(&self) -> bool;
}

/// Listener registry shared by the channel implementations.
#[derive(Default)]
pub struct Listeners {
    next_id: AtomicU64,
    handlers: Mutex<HashMap<ChannelEvent, Vec<(ListenerId, EventHandler)>>>,
}

impl Listeners {
    pub fn add(&self, event: ChannelEvent, handler: EventHandler) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        lock(&self.handlers)
            .entry(event)
            .or_default()
            .push((id, handler));
        id
    }

    pub fn remove(&self, event: ChannelEvent, id: ListenerId) {
        if let Some(list) = lock(&self.handlers).get_mut(&event) {
            list.retain(|(existing, _)| *existing != id);
        }
    }

    /// Invokes every handler of `event` and returns how many ran. Handlers
    /// are called outside the lock so they may register or remove listeners.
    pub fn emit(&self, event: ChannelEvent, payload: &Value) -> usize {
        let handlers: Vec<EventHandler> = lock(&self.handlers)
            .get(&event)
            .map(|list| list.iter().map(|(_, h)| h.clone()).collect())
            .unwrap_or_default();
        for handler in &handlers {
            handler(payload);
        }
        handlers.len()
    }

    pub fn count(&self, event: ChannelEvent) -> usize {
        lock(&self.handlers).get(&event).map_or(0, Vec::len)
    }
}

/// Poisoned locks only mean another handler panicked; the data is still
/// consistent for our use.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_event_names_round_trip() {
        for event in [
            ChannelEvent::Connect,
            ChannelEvent::Disconnect,
            ChannelEvent::DeviceUpdates,
            ChannelEvent::DevicesLocationUpdates,
            ChannelEvent::RemoveUpdates,
            ChannelEvent::GetDeviceUpdate,
            ChannelEvent::GetDevicesLocationUpdates,
        ] {
            assert_eq!(event.as_str().parse::<ChannelEvent>().unwrap(), event);
        }
        assert!("bogus".parse::<ChannelEvent>().is_err());
    }

    #[test]
    fn test_listeners_remove_only_one_handler() {
        let listeners = Listeners::default();
        let hits = Arc::new(AtomicUsize::new(0));

        let h1 = hits.clone();
        let first = listeners.add(
            ChannelEvent::GetDeviceUpdate,
            Arc::new(move |_| {
                h1.fetch_add(1, Ordering::SeqCst);
            }),
        );
        let h2 = hits.clone();
        listeners.add(
            ChannelEvent::GetDeviceUpdate,
            Arc::new(move |_| {
                h2.fetch_add(10, Ordering::SeqCst);
            }),
        );

        assert_eq!(listeners.emit(ChannelEvent::GetDeviceUpdate, &Value::Null), 2);
        listeners.remove(ChannelEvent::GetDeviceUpdate, first);
        assert_eq!(listeners.emit(ChannelEvent::GetDeviceUpdate, &Value::Null), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 21);
        assert_eq!(listeners.count(ChannelEvent::GetDeviceUpdate), 1);
        assert_eq!(listeners.count(ChannelEvent::Connect), 0);
    }
}
