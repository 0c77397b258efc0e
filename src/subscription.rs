//! Telemetry subscription manager.
//!
//! One manager owns the interest set of one logical context (the fleet view
//! or the single selected vehicle) and keeps the channel in step with it:
//!
//! - a new interest replaces the previous one with an unsubscribe/subscribe
//!   pair, so the channel never holds two subscriptions for the context;
//! - concurrent requests are serialized and coalesced, the last one wins;
//! - after a reconnect the last requested interest is replayed;
//! - every `on_update` registration returns its own handle.
//!
//! Channel failures never surface to callers. Telemetry is best effort and
//! the store keeps serving the last known state.

use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::channel::{lock, Channel, ChannelEvent, ListenerId};
use crate::models::TelemetryDelta;

/// The device set a context wants updates for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interest {
    Fleet {
        device_ids: BTreeSet<String>,
        org_id: String,
    },
    Single {
        device_id: String,
        org_id: String,
    },
}

impl Interest {
    pub fn fleet<I, S>(device_ids: I, org_id: &str) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Interest::Fleet {
            device_ids: device_ids.into_iter().map(Into::into).collect(),
            org_id: org_id.to_string(),
        }
    }

    pub fn single(device_id: &str, org_id: &str) -> Self {
        Interest::Single {
            device_id: device_id.to_string(),
            org_id: org_id.to_string(),
        }
    }

    pub fn includes(&self, device_id: &str) -> bool {
        match self {
            Interest::Fleet { device_ids, .. } => device_ids.contains(device_id),
            Interest::Single { device_id: id, .. } => id == device_id,
        }
    }

    fn subscribe_event(&self) -> ChannelEvent {
        match self {
            Interest::Fleet { .. } => ChannelEvent::DevicesLocationUpdates,
            Interest::Single { .. } => ChannelEvent::DeviceUpdates,
        }
    }

    fn payload(&self, context_id: &str) -> Value {
        match self {
            Interest::Fleet { device_ids, org_id } => json!({
                "contextId": context_id,
                "deviceIds": device_ids,
                "orgId": org_id,
            }),
            Interest::Single { device_id, org_id } => json!({
                "contextId": context_id,
                "deviceIds": [device_id],
                "orgId": org_id,
            }),
        }
    }
}

type UpdateHandler = Arc<dyn Fn(&TelemetryDelta) + Send + Sync>;

/// What a sync may assume about the interest the channel holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SyncMode {
    /// `active` is accurate; send only the difference.
    Diff,
    /// The link was re-established and the remote end holds nothing.
    Reconnected,
    /// The link is live; drop whatever is active and subscribe again.
    Refresh,
}

#[derive(Default)]
struct State {
    /// Last interest requested by the caller.
    desired: Option<Interest>,
    /// Interest the channel currently holds for this context.
    active: Option<Interest>,
    handlers: Vec<(u64, UpdateHandler)>,
    listeners: Vec<(ChannelEvent, ListenerId)>,
}

struct Inner {
    context_id: String,
    channel: Arc<dyn Channel>,
    /// Bumped by every request; a request whose number is no longer the
    /// latest must not touch the channel.
    seq: AtomicU64,
    next_handler: AtomicU64,
    state: Mutex<State>,
    /// Serializes channel traffic of this context.
    ops: tokio::sync::Mutex<()>,
}

pub struct SubscriptionManager {
    inner: Arc<Inner>,
}

/// Handle returned by [`SubscriptionManager::on_update`].
#[must_use = "dropping the handle keeps the handler registered; call unsubscribe() to remove it"]
pub struct UpdateSubscription {
    id: u64,
    inner: Weak<Inner>,
}

impl UpdateSubscription {
    /// Removes this handler only. Other listeners keep receiving updates.
    pub fn unsubscribe(self) {
        if let Some(inner) = self.inner.upgrade() {
            lock(&inner.state).handlers.retain(|(id, _)| *id != self.id);
        }
    }
}

impl SubscriptionManager {
    pub fn new(channel: Arc<dyn Channel>) -> Self {
        Self {
            inner: Arc::new(Inner {
                context_id: Uuid::new_v4().to_string(),
                channel,
                seq: AtomicU64::new(0),
                next_handler: AtomicU64::new(0),
                state: Mutex::new(State::default()),
                ops: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Identifier sent with every request so the gateway can tell contexts
    /// sharing a connection apart.
    pub fn context_id(&self) -> &str {
        &self.inner.context_id
    }

    /// Replaces this context's interest with the given device set.
    pub async fn subscribe<I, S>(&self, device_ids: I, org_id: &str)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.request(Interest::fleet(device_ids, org_id)).await;
    }

    /// Narrows this context to exactly one device, superseding any fleet
    /// subscription it held.
    pub async fn subscribe_single(&self, device_id: &str, org_id: &str) {
        self.request(Interest::single(device_id, org_id)).await;
    }

    pub fn on_update<F>(&self, handler: F) -> UpdateSubscription
    where
        F: Fn(&TelemetryDelta) + Send + Sync + 'static,
    {
        attach_listeners(&self.inner);
        let id = self.inner.next_handler.fetch_add(1, Ordering::SeqCst);
        lock(&self.inner.state)
            .handlers
            .push((id, Arc::new(handler)));
        UpdateSubscription {
            id,
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Tears the context down. Handlers and channel listeners are removed
    /// before anything is awaited, so nothing fires once this is called.
    pub async fn unsubscribe_all(&self) {
        let seq = self.inner.next_seq();
        let listeners = {
            let mut state = lock(&self.inner.state);
            state.handlers.clear();
            state.desired = None;
            std::mem::take(&mut state.listeners)
        };
        for (event, id) in listeners {
            self.inner.channel.off(event, id);
        }
        self.inner.sync(seq, SyncMode::Diff).await;
        info!("Context {} unsubscribed", self.inner.context_id);
    }

    /// Re-issues the last requested interest over a live channel: the
    /// current subscription is removed first, then subscribed again.
    /// Reconnects replay the interest on their own.
    pub async fn resync(&self) {
        let seq = self.inner.next_seq();
        self.inner.sync(seq, SyncMode::Refresh).await;
    }

    pub fn desired(&self) -> Option<Interest> {
        lock(&self.inner.state).desired.clone()
    }

    pub fn active(&self) -> Option<Interest> {
        lock(&self.inner.state).active.clone()
    }

    pub fn handler_count(&self) -> usize {
        lock(&self.inner.state).handlers.len()
    }

    async fn request(&self, interest: Interest) {
        attach_listeners(&self.inner);
        let seq = self.inner.next_seq();
        lock(&self.inner.state).desired = Some(interest);
        self.inner.sync(seq, SyncMode::Diff).await;
    }
}

impl Drop for SubscriptionManager {
    fn drop(&mut self) {
        let listeners = std::mem::take(&mut lock(&self.inner.state).listeners);
        for (event, id) in listeners {
            self.inner.channel.off(event, id);
        }
    }
}

/// Registers the channel listeners this context needs, once. The closures
/// hold a weak reference so the channel never keeps a context alive.
fn attach_listeners(inner: &Arc<Inner>) {
    let mut state = lock(&inner.state);
    if !state.listeners.is_empty() {
        return;
    }

    for event in [
        ChannelEvent::GetDeviceUpdate,
        ChannelEvent::GetDevicesLocationUpdates,
    ] {
        let weak = Arc::downgrade(inner);
        let id = inner.channel.on(
            event,
            Arc::new(move |payload: &Value| {
                if let Some(inner) = weak.upgrade() {
                    inner.dispatch(payload);
                }
            }),
        );
        state.listeners.push((event, id));
    }

    let weak = Arc::downgrade(inner);
    let id = inner.channel.on(
        ChannelEvent::Disconnect,
        Arc::new(move |_: &Value| {
            if let Some(inner) = weak.upgrade() {
                lock(&inner.state).active = None;
            }
        }),
    );
    state.listeners.push((ChannelEvent::Disconnect, id));

    let weak = Arc::downgrade(inner);
    let id = inner.channel.on(
        ChannelEvent::Connect,
        Arc::new(move |_: &Value| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move { inner.replay().await });
                }
                Err(_) => warn!(
                    "Context {} reconnected outside a runtime; interest not replayed",
                    inner.context_id
                ),
            }
        }),
    );
    state.listeners.push((ChannelEvent::Connect, id));
}

impl Inner {
    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn is_current(&self, seq: u64) -> bool {
        self.seq.load(Ordering::SeqCst) == seq
    }

    async fn replay(&self) {
        let seq = self.next_seq();
        self.sync(seq, SyncMode::Reconnected).await;
    }

    /// Brings the channel in line with `desired`. A superseded request
    /// returns without touching the channel or the recorded state.
    async fn sync(&self, seq: u64, mode: SyncMode) {
        let _guard = self.ops.lock().await;

        if !self.is_current(seq) {
            debug!("Context {}: request {} superseded", self.context_id, seq);
            return;
        }
        let (desired, active) = {
            let mut state = lock(&self.state);
            if mode == SyncMode::Reconnected {
                state.active = None;
            }
            (state.desired.clone(), state.active.clone())
        };
        if desired == active && mode != SyncMode::Refresh {
            debug!("Context {}: interest unchanged", self.context_id);
            return;
        }
        if !self.channel.is_connected() {
            warn!(
                "Context {}: telemetry channel unavailable, interest will be replayed on reconnect",
                self.context_id
            );
            if desired.is_none() {
                lock(&self.state).active = None;
            }
            return;
        }

        if let Some(previous) = active {
            match self
                .channel
                .send(ChannelEvent::RemoveUpdates, previous.payload(&self.context_id))
                .await
            {
                Ok(()) => lock(&self.state).active = None,
                Err(e) => {
                    warn!("Context {}: failed to unsubscribe: {}", self.context_id, e);
                    return;
                }
            }
            if !self.is_current(seq) {
                debug!("Context {}: request {} superseded", self.context_id, seq);
                return;
            }
        }

        if let Some(next) = desired {
            match self
                .channel
                .send(next.subscribe_event(), next.payload(&self.context_id))
                .await
            {
                Ok(()) => {
                    debug!("Context {}: subscribed {:?}", self.context_id, next);
                    lock(&self.state).active = Some(next);
                }
                Err(e) => warn!("Context {}: failed to subscribe: {}", self.context_id, e),
            }
        }
    }

    /// Fans inbound deltas out to the registered handlers. Deltas for
    /// devices outside the current interest belong to a stale context and
    /// are dropped.
    fn dispatch(&self, payload: &Value) {
        for delta in parse_deltas(payload) {
            let handlers = {
                let state = lock(&self.state);
                match &state.desired {
                    Some(interest) if interest.includes(&delta.device_id) => {}
                    _ => {
                        debug!(
                            "Context {}: dropping delta for device {} outside interest",
                            self.context_id, delta.device_id
                        );
                        continue;
                    }
                }
                state.handlers.clone()
            };

            for (id, handler) in handlers {
                // A handler removed by an earlier one in this loop must not run.
                let registered = lock(&self.state).handlers.iter().any(|(h, _)| *h == id);
                if registered {
                    handler(&delta);
                }
            }
        }
    }
}

/// Accepts a single delta object or an array of them. Malformed entries are
/// skipped without discarding the rest.
fn parse_deltas(payload: &Value) -> Vec<TelemetryDelta> {
    let items: Vec<&Value> = match payload {
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    };
    items
        .into_iter()
        .filter_map(|item| match TelemetryDelta::deserialize(item) {
            Ok(delta) => Some(delta),
            Err(e) => {
                warn!("Skipping malformed telemetry delta: {}", e);
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MemoryChannel;
    use std::sync::Mutex as StdMutex;

    fn setup() -> (Arc<MemoryChannel>, SubscriptionManager) {
        let channel = Arc::new(MemoryChannel::connected());
        let manager = SubscriptionManager::new(channel.clone());
        (channel, manager)
    }

    fn device_ids(payload: &Value) -> Vec<String> {
        payload["deviceIds"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap().to_string())
            .collect()
    }

    fn recorder(manager: &SubscriptionManager) -> (Arc<StdMutex<Vec<TelemetryDelta>>>, UpdateSubscription) {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = seen.clone();
        let handle = manager.on_update(move |delta| sink.lock().unwrap().push(delta.clone()));
        (seen, handle)
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_resubscribe_replaces_previous_interest() {
        let (channel, manager) = setup();

        manager.subscribe(["d1", "d2"], "org").await;
        manager.subscribe(["d3"], "org").await;

        let events: Vec<ChannelEvent> = channel.sent().iter().map(|m| m.event).collect();
        assert_eq!(
            events,
            vec![
                ChannelEvent::DevicesLocationUpdates,
                ChannelEvent::RemoveUpdates,
                ChannelEvent::DevicesLocationUpdates,
            ]
        );

        let active = channel.active_subscriptions();
        assert_eq!(active.len(), 1);
        let only = active.values().next().unwrap();
        assert_eq!(device_ids(&only.payload), vec!["d3".to_string()]);
        assert_eq!(manager.active(), Some(Interest::fleet(["d3"], "org")));
    }

    #[tokio::test]
    async fn test_same_interest_is_not_resent() {
        let (channel, manager) = setup();
        manager.subscribe(["d2", "d1"], "org").await;
        manager.subscribe(["d1", "d2"], "org").await;
        assert_eq!(channel.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_single_supersedes_fleet() {
        let (channel, manager) = setup();
        manager.subscribe(["d1", "d2"], "org").await;
        manager.subscribe_single("d2", "org").await;

        let sent = channel.sent();
        assert_eq!(sent[1].event, ChannelEvent::RemoveUpdates);
        assert_eq!(sent[2].event, ChannelEvent::DeviceUpdates);
        assert_eq!(device_ids(&sent[2].payload), vec!["d2".to_string()]);

        let active = channel.active_subscriptions();
        assert_eq!(active.len(), 1);
        assert_eq!(active.values().next().unwrap().event, ChannelEvent::DeviceUpdates);
    }

    #[tokio::test]
    async fn test_contexts_sharing_a_channel_are_independent() {
        let channel = Arc::new(MemoryChannel::connected());
        let fleet = SubscriptionManager::new(channel.clone());
        let detail = SubscriptionManager::new(channel.clone());

        fleet.subscribe(["d1", "d2"], "org").await;
        detail.subscribe_single("d1", "org").await;
        assert_eq!(channel.active_subscriptions().len(), 2);

        detail.unsubscribe_all().await;
        let active = channel.active_subscriptions();
        assert_eq!(active.len(), 1);
        assert!(active.contains_key(fleet.context_id()));
    }

    #[tokio::test]
    async fn test_concurrent_subscribes_last_wins() {
        let (channel, manager) = setup();

        tokio::join!(
            manager.subscribe(["a"], "org"),
            manager.subscribe(["b"], "org"),
            manager.subscribe(["c"], "org"),
        );

        let sent_ids: Vec<Vec<String>> = channel.sent().iter().map(|m| device_ids(&m.payload)).collect();
        assert!(!sent_ids.contains(&vec!["b".to_string()]));

        let active = channel.active_subscriptions();
        assert_eq!(active.len(), 1);
        assert_eq!(device_ids(&active.values().next().unwrap().payload), vec!["c".to_string()]);
        assert_eq!(manager.active(), Some(Interest::fleet(["c"], "org")));
    }

    #[tokio::test]
    async fn test_handlers_receive_deltas_and_unsubscribe_independently() {
        let (channel, manager) = setup();
        manager.subscribe(["d1", "d2"], "org").await;

        let (first, first_handle) = recorder(&manager);
        let (second, _second_handle) = recorder(&manager);

        channel.emit(
            ChannelEvent::GetDevicesLocationUpdates,
            json!([{"deviceId": "d1", "speed": "40"}, {"deviceId": "d2", "ignition": true}]),
        );
        assert_eq!(first.lock().unwrap().len(), 2);
        assert_eq!(second.lock().unwrap().len(), 2);
        assert_eq!(first.lock().unwrap()[0].speed, Some(40.0));

        first_handle.unsubscribe();
        channel.emit(ChannelEvent::GetDeviceUpdate, json!({"deviceId": "d1", "movement": false}));
        assert_eq!(first.lock().unwrap().len(), 2);
        assert_eq!(second.lock().unwrap().len(), 3);
        assert_eq!(manager.handler_count(), 1);
    }

    #[tokio::test]
    async fn test_deltas_outside_interest_are_dropped() {
        let (channel, manager) = setup();
        manager.subscribe(["d1"], "org").await;
        let (seen, _handle) = recorder(&manager);

        channel.emit(
            ChannelEvent::GetDevicesLocationUpdates,
            json!([{"deviceId": "d9"}, {"deviceId": "d1"}, {"speed": 3}]),
        );
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].device_id, "d1");
    }

    #[tokio::test]
    async fn test_unsubscribe_all_silences_handlers() {
        let (channel, manager) = setup();
        manager.subscribe(["d1"], "org").await;
        let (seen, _handle) = recorder(&manager);

        manager.unsubscribe_all().await;

        assert_eq!(channel.sent().last().unwrap().event, ChannelEvent::RemoveUpdates);
        assert!(channel.active_subscriptions().is_empty());
        assert_eq!(channel.listener_count(ChannelEvent::GetDeviceUpdate), 0);
        assert_eq!(channel.listener_count(ChannelEvent::Connect), 0);

        assert_eq!(channel.emit(ChannelEvent::GetDeviceUpdate, json!({"deviceId": "d1"})), 0);
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(manager.desired(), None);
        assert_eq!(manager.active(), None);
    }

    #[tokio::test]
    async fn test_handler_removed_mid_dispatch_does_not_fire() {
        let (channel, manager) = setup();
        manager.subscribe(["d1"], "org").await;

        let slot: Arc<StdMutex<Option<UpdateSubscription>>> = Arc::new(StdMutex::new(None));
        let fired = Arc::new(StdMutex::new(0));

        let victim_slot = slot.clone();
        let _killer = manager.on_update(move |_| {
            if let Some(handle) = victim_slot.lock().unwrap().take() {
                handle.unsubscribe();
            }
        });
        let counter = fired.clone();
        let victim = manager.on_update(move |_| *counter.lock().unwrap() += 1);
        *slot.lock().unwrap() = Some(victim);

        channel.emit(ChannelEvent::GetDeviceUpdate, json!({"deviceId": "d1"}));
        assert_eq!(*fired.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unavailable_channel_is_a_silent_no_op_then_replays() {
        let channel = Arc::new(MemoryChannel::new());
        let manager = SubscriptionManager::new(channel.clone());

        manager.subscribe(["d1", "d2"], "org").await;
        assert!(channel.sent().is_empty());
        assert_eq!(manager.active(), None);
        assert_eq!(manager.desired(), Some(Interest::fleet(["d1", "d2"], "org")));

        channel.connect().await.unwrap();
        settle().await;

        let sent = channel.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].event, ChannelEvent::DevicesLocationUpdates);
        assert_eq!(manager.active(), manager.desired());
    }

    #[tokio::test]
    async fn test_reconnect_replays_last_interest() {
        let (channel, manager) = setup();
        manager.subscribe(["d1"], "org").await;
        manager.subscribe(["d4"], "org").await;
        channel.take_sent();

        channel.drop_connection();
        assert_eq!(manager.active(), None);
        channel.connect().await.unwrap();
        settle().await;

        let sent = channel.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].event, ChannelEvent::DevicesLocationUpdates);
        assert_eq!(device_ids(&sent[0].payload), vec!["d4".to_string()]);
    }

    #[tokio::test]
    async fn test_explicit_resync_resends_interest() {
        let (channel, manager) = setup();
        manager.subscribe_single("d7", "org").await;
        channel.take_sent();

        manager.resync().await;
        let sent = channel.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].event, ChannelEvent::RemoveUpdates);
        assert_eq!(sent[1].event, ChannelEvent::DeviceUpdates);
        assert_eq!(channel.active_subscriptions().len(), 1);
    }

    #[tokio::test]
    async fn test_superseded_resync_keeps_pending_unsubscribe() {
        let (channel, manager) = setup();

        tokio::join!(
            manager.subscribe(["d1"], "org"),
            manager.resync(),
            manager.subscribe(["d3"], "org"),
        );

        let sent = channel.sent();
        let d3_at = sent
            .iter()
            .position(|m| {
                m.event == ChannelEvent::DevicesLocationUpdates && device_ids(&m.payload) == vec!["d3".to_string()]
            })
            .unwrap();
        let removed = sent[..d3_at]
            .iter()
            .filter(|m| m.event == ChannelEvent::RemoveUpdates)
            .count();
        let subscribed = sent[..d3_at]
            .iter()
            .filter(|m| m.event == ChannelEvent::DevicesLocationUpdates)
            .count();
        assert_eq!(removed, subscribed);
        assert!(removed >= 1);
        assert_eq!(manager.active(), Some(Interest::fleet(["d3"], "org")));
    }

    #[test]
    fn test_parse_deltas_accepts_object_or_array() {
        assert_eq!(parse_deltas(&json!({"deviceId": "a"})).len(), 1);
        assert_eq!(parse_deltas(&json!([{"deviceId": "a"}, {"deviceId": "b"}])).len(), 2);
        assert!(parse_deltas(&json!("garbage")).is_empty());
    }
}
