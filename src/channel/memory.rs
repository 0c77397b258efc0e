use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use super::{lock, Channel, ChannelEvent, EventHandler, ListenerId, Listeners};
use crate::error::ChannelError;

#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub event: ChannelEvent,
    pub payload: Value,
}

/// In-process channel. Records every outbound message and lets the caller
/// inject inbound events and connection drops.
pub struct MemoryChannel {
    connected: AtomicBool,
    available: AtomicBool,
    listeners: Listeners,
    sent: Mutex<Vec<SentMessage>>,
}

impl Default for MemoryChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryChannel {
    /// Starts disconnected but reachable.
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(false),
            available: AtomicBool::new(true),
            listeners: Listeners::default(),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Starts already connected.
    pub fn connected() -> Self {
        let channel = Self::new();
        channel.connected.store(true, Ordering::SeqCst);
        channel
    }

    /// While unavailable, `connect` fails.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Simulates the link dropping.
    pub fn drop_connection(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            self.listeners.emit(ChannelEvent::Disconnect, &Value::Null);
        }
    }

    /// Delivers an inbound event to the registered listeners.
    pub fn emit(&self, event: ChannelEvent, payload: Value) -> usize {
        self.listeners.emit(event, &payload)
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        lock(&self.sent).clone()
    }

    pub fn take_sent(&self) -> Vec<SentMessage> {
        std::mem::take(&mut *lock(&self.sent))
    }

    pub fn listener_count(&self, event: ChannelEvent) -> usize {
        self.listeners.count(event)
    }

    /// Subscriptions the remote end would consider live, keyed by the
    /// `contextId` carried in each payload.
    pub fn active_subscriptions(&self) -> BTreeMap<String, SentMessage> {
        let mut active = BTreeMap::new();
        for message in lock(&self.sent).iter() {
            let context = message
                .payload
                .get("contextId")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            match message.event {
                ChannelEvent::DeviceUpdates | ChannelEvent::DevicesLocationUpdates => {
                    active.insert(context, message.clone());
                }
                ChannelEvent::RemoveUpdates => {
                    active.remove(&context);
                }
                _ => {}
            }
        }
        active
    }
}

impl Channel for MemoryChannel {
    fn connect(&self) -> BoxFuture<'_, Result<(), ChannelError>> {
        async move {
            if !self.available.load(Ordering::SeqCst) {
                return Err(ChannelError::Unavailable);
            }
            if !self.connected.swap(true, Ordering::SeqCst) {
                self.listeners.emit(ChannelEvent::Connect, &Value::Null);
            }
            Ok(())
        }
        .boxed()
    }

    fn send(&self, event: ChannelEvent, payload: Value) -> BoxFuture<'_, Result<(), ChannelError>> {
        async move {
            if !self.connected.load(Ordering::SeqCst) {
                return Err(ChannelError::Unavailable);
            }
            lock(&self.sent).push(SentMessage { event, payload });
            // One scheduler hop, like a real network write.
            tokio::task::yield_now().await;
            Ok(())
        }
        .boxed()
    }

    fn on(&self, event: ChannelEvent, handler: EventHandler) -> ListenerId {
        self.listeners.add(event, handler)
    }

    fn off(&self, event: ChannelEvent, id: ListenerId) {
        self.listeners.remove(event, id);
    }

    fn disconnect(&self) -> BoxFuture<'_, Result<(), ChannelError>> {
        async move {
            self.drop_connection();
            Ok(())
        }
        .boxed()
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_send_requires_connection() {
        let channel = MemoryChannel::new();
        assert!(matches!(
            channel.send(ChannelEvent::RemoveUpdates, json!({})).await,
            Err(ChannelError::Unavailable)
        ));

        channel.connect().await.unwrap();
        channel
            .send(ChannelEvent::RemoveUpdates, json!({"contextId": "a"}))
            .await
            .unwrap();
        assert_eq!(channel.sent().len(), 1);
        assert_eq!(channel.take_sent().len(), 1);
        assert!(channel.sent().is_empty());
    }

    #[tokio::test]
    async fn test_unavailable_channel_refuses_connect() {
        let channel = MemoryChannel::new();
        channel.set_available(false);
        assert!(channel.connect().await.is_err());
        assert!(!channel.is_connected());
    }

    #[tokio::test]
    async fn test_active_subscriptions_follow_remove() {
        let channel = MemoryChannel::connected();
        channel
            .send(ChannelEvent::DevicesLocationUpdates, json!({"contextId": "a", "deviceIds": ["d1"]}))
            .await
            .unwrap();
        channel
            .send(ChannelEvent::DeviceUpdates, json!({"contextId": "b", "deviceIds": ["d2"]}))
            .await
            .unwrap();
        channel
            .send(ChannelEvent::RemoveUpdates, json!({"contextId": "a"}))
            .await
            .unwrap();

        let active = channel.active_subscriptions();
        assert_eq!(active.len(), 1);
        assert!(active.contains_key("b"));
    }
}
