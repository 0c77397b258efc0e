use futures::future::BoxFuture;
use futures::FutureExt;
use prost::Message as _;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::{Headers, Message};
use rdkafka::producer::{FutureProducer, FutureRecord};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{lock, Channel, ChannelEvent, EventHandler, ListenerId, Listeners};
use crate::error::ChannelError;
use crate::models::wire::DeviceUpdateBatch;
use crate::models::TelemetryDelta;

pub const PROTOBUF_CONTENT_TYPE: &str = "application/x-protobuf";

#[derive(Debug, Clone)]
pub struct KafkaSettings {
    pub bootstrap_servers: String,
    /// Inbound device deltas.
    pub telemetry_topic: String,
    /// Outbound subscribe/unsubscribe requests.
    pub control_topic: String,
    pub group_id: String,
    pub auto_offset_reset: String,
    pub security_protocol: String,
    pub sasl_mechanism: String,
    pub username: String,
    pub password: String,
    pub max_retries: u32,
    pub circuit_breaker_cooldown: Duration,
}

/// Channel backed by a Kafka telemetry topic and a control topic.
///
/// Outbound events are produced to the control topic keyed by event name.
/// Inbound records are decoded and dispatched in delivery order.
pub struct KafkaChannel {
    settings: KafkaSettings,
    client_id: String,
    listeners: Arc<Listeners>,
    connected: Arc<AtomicBool>,
    producer: Mutex<Option<FutureProducer>>,
    consumer_task: Mutex<Option<JoinHandle<()>>>,
}

impl KafkaChannel {
    pub fn new(settings: KafkaSettings) -> Self {
        Self {
            settings,
            client_id: format!("fleet-tracker-{}", Uuid::new_v4()),
            listeners: Arc::new(Listeners::default()),
            connected: Arc::new(AtomicBool::new(false)),
            producer: Mutex::new(None),
            consumer_task: Mutex::new(None),
        }
    }

    fn client_config(&self) -> ClientConfig {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &self.settings.bootstrap_servers)
            .set("client.id", &self.client_id)
            .set("security.protocol", &self.settings.security_protocol);
        if !self.settings.username.is_empty() {
            client_config
                .set("sasl.mechanism", &self.settings.sasl_mechanism)
                .set("sasl.username", &self.settings.username)
                .set("sasl.password", &self.settings.password);
        }
        client_config
    }

    async fn open(&self) -> Result<(), ChannelError> {
        if self.connected.load(Ordering::SeqCst) {
            return Ok(());
        }
        info!(
            "Connecting telemetry channel to {} (topic: {})",
            self.settings.bootstrap_servers, self.settings.telemetry_topic
        );

        let consumer: StreamConsumer = self
            .client_config()
            .set("group.id", &self.settings.group_id)
            .set("auto.offset.reset", &self.settings.auto_offset_reset)
            .create()
            .map_err(transport)?;
        consumer
            .subscribe(&[self.settings.telemetry_topic.as_str()])
            .map_err(transport)?;

        let producer: FutureProducer = self.client_config().create().map_err(transport)?;
        *lock(&self.producer) = Some(producer);
        self.connected.store(true, Ordering::SeqCst);

        let task = tokio::spawn(consume(
            consumer,
            self.listeners.clone(),
            self.connected.clone(),
            self.settings.max_retries,
            self.settings.circuit_breaker_cooldown,
        ));
        if let Some(previous) = lock(&self.consumer_task).replace(task) {
            previous.abort();
        }

        info!("Subscribed to topic: {}", self.settings.telemetry_topic);
        self.listeners.emit(ChannelEvent::Connect, &Value::Null);
        Ok(())
    }

    async fn produce(&self, event: ChannelEvent, payload: Value) -> Result<(), ChannelError> {
        let producer = lock(&self.producer)
            .clone()
            .ok_or(ChannelError::Unavailable)?;
        if !self.connected.load(Ordering::SeqCst) {
            return Err(ChannelError::Unavailable);
        }

        let body = serde_json::to_vec(&json!({
            "event": event.as_str(),
            "clientId": self.client_id,
            "payload": payload,
        }))?;
        let record = FutureRecord::to(&self.settings.control_topic)
            .key(event.as_str())
            .payload(&body);

        producer
            .send(record, Duration::from_secs(0))
            .await
            .map_err(|(e, _)| ChannelError::Transport(e.to_string()))?;
        debug!("Sent {} to {}", event, self.settings.control_topic);
        Ok(())
    }

    fn close(&self) {
        if let Some(task) = lock(&self.consumer_task).take() {
            task.abort();
        }
        lock(&self.producer).take();
        if self.connected.swap(false, Ordering::SeqCst) {
            info!("Telemetry channel disconnected");
            self.listeners.emit(ChannelEvent::Disconnect, &Value::Null);
        }
    }
}

impl Drop for KafkaChannel {
    fn drop(&mut self) {
        if let Some(task) = lock(&self.consumer_task).take() {
            task.abort();
        }
    }
}

impl Channel for KafkaChannel {
    fn connect(&self) -> BoxFuture<'_, Result<(), ChannelError>> {
        self.open().boxed()
    }

    fn send(&self, event: ChannelEvent, payload: Value) -> BoxFuture<'_, Result<(), ChannelError>> {
        self.produce(event, payload).boxed()
    }

    fn on(&self, event: ChannelEvent, handler: EventHandler) -> ListenerId {
        self.listeners.add(event, handler)
    }

    fn off(&self, event: ChannelEvent, id: ListenerId) {
        self.listeners.remove(event, id);
    }

    fn disconnect(&self) -> BoxFuture<'_, Result<(), ChannelError>> {
        async move {
            self.close();
            Ok(())
        }
        .boxed()
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

fn transport(e: rdkafka::error::KafkaError) -> ChannelError {
    ChannelError::Transport(e.to_string())
}

/// Consumer loop with a circuit breaker. After `max_retries` consecutive
/// errors the channel reports a disconnect, cools down, then reports a
/// connect so subscribers replay their interest.
async fn consume(
    consumer: StreamConsumer,
    listeners: Arc<Listeners>,
    connected: Arc<AtomicBool>,
    max_retries: u32,
    cooldown: Duration,
) {
    let mut consecutive_failures = 0;

    loop {
        if consecutive_failures >= max_retries {
            warn!(
                "Circuit breaker tripped ({} consecutive failures)! Sleeping for {} seconds...",
                consecutive_failures,
                cooldown.as_secs()
            );
            if connected.swap(false, Ordering::SeqCst) {
                listeners.emit(ChannelEvent::Disconnect, &Value::Null);
            }
            tokio::time::sleep(cooldown).await;
            consecutive_failures = 0;
            info!("Circuit breaker reset. Resuming consumption.");
            connected.store(true, Ordering::SeqCst);
            listeners.emit(ChannelEvent::Connect, &Value::Null);
        }

        let failed = match consumer.recv().await {
            Ok(m) => {
                consecutive_failures = 0;

                let payload = match m.payload() {
                    None => {
                        warn!("Received empty payload from Kafka");
                        continue;
                    }
                    Some(p) => p,
                };
                let content_type = m.headers().and_then(|headers| {
                    headers
                        .iter()
                        .find(|h| h.key.eq_ignore_ascii_case("content-type"))
                        .and_then(|h| h.value)
                        .and_then(|v| std::str::from_utf8(v).ok())
                });

                // Dispatched inline: per-device delivery order must survive.
                match decode_record(m.key(), content_type, payload) {
                    Ok((event, body)) => {
                        listeners.emit(event, &body);
                    }
                    Err(e) => warn!("Dropping undecodable telemetry record: {}", e),
                }
                false
            }
            Err(e) => {
                error!(
                    "Kafka error: {}. Incrementing failure count ({} / {})",
                    e,
                    consecutive_failures + 1,
                    max_retries
                );
                true
            }
        };

        if failed {
            consecutive_failures += 1;
            // Small delay to prevent tight loop in case of minor network glitches
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    }
}

#[derive(Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    payload: Value,
}

/// Turns a raw telemetry record into an event name and JSON body.
///
/// Protobuf batches are recognised by the `content-type` header. JSON
/// records either carry an `{"event", "payload"}` envelope or are the bare
/// body with the event name in the record key.
pub fn decode_record(
    key: Option<&[u8]>,
    content_type: Option<&str>,
    payload: &[u8],
) -> Result<(ChannelEvent, Value), ChannelError> {
    let key_event = key
        .and_then(|k| std::str::from_utf8(k).ok())
        .and_then(|k| k.parse::<ChannelEvent>().ok());

    if content_type.map_or(false, |ct| ct.eq_ignore_ascii_case(PROTOBUF_CONTENT_TYPE)) {
        let batch = DeviceUpdateBatch::decode(payload)
            .map_err(|e| ChannelError::Decode(e.to_string()))?;
        let event = if batch.event.is_empty() {
            key_event.unwrap_or(ChannelEvent::GetDevicesLocationUpdates)
        } else {
            batch.event.parse()?
        };
        let deltas: Vec<TelemetryDelta> = batch.updates.into_iter().map(Into::into).collect();
        return Ok((event, serde_json::to_value(deltas)?));
    }

    let body: Value =
        serde_json::from_slice(payload).map_err(|e| ChannelError::Decode(e.to_string()))?;
    if let Some(event) = key_event {
        return Ok((event, body));
    }
    let envelope: Envelope = serde_json::from_value(body)
        .map_err(|e| ChannelError::Decode(format!("missing event envelope: {}", e)))?;
    Ok((envelope.event.parse()?, envelope.payload))
}
