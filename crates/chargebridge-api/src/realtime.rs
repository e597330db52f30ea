//! MQTT realtime feed with auto-reconnect.
//!
//! Connects to the vendor broker, subscribes to the charging-controller
//! topics of one service location and streams decoded messages through a
//! [`tokio::sync::broadcast`] channel. Reconnection uses capped exponential
//! backoff. While connected, a tracking ping is published periodically so
//! the cloud keeps pushing realtime values.
//!
//! # Example
//!
//! ```rust,ignore
//! use chargebridge_api::realtime::{MqttFeedConfig, RealtimeHandle, ReconnectConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! let cancel = CancellationToken::new();
//! let handle = RealtimeHandle::connect(config, ReconnectConfig::default(), cancel.clone());
//! let mut rx = handle.subscribe();
//!
//! while let Ok(msg) = rx.recv().await {
//!     println!("{:?} {}", msg.kind, msg.payload);
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS, Transport};
use serde_json::{Value, json};
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;

use crate::error::Error;

// ── Channel capacities ───────────────────────────────────────────────

const MESSAGE_CHANNEL_CAPACITY: usize = 1024;
const CLIENT_REQUEST_CAPACITY: usize = 32;

// ── Topic classification ─────────────────────────────────────────────

const CHARGING_CONTROLLER: &str = "/etc/carcharger/acchargingcontroller/";
const LED_CONTROLLER: &str = "/etc/led/acledcontroller/";

/// What a topic carries, with the device UUID pulled out where the
/// topic names one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicKind {
    /// `.../devices/{uuid}/state`: connection status, configuration errors.
    ConnectorState { device: String },
    /// `.../devices/{uuid}/property/chargingstate`: session, mode, limits.
    ChargingState { device: String },
    /// `.../acchargingcontroller/v1/devices/updated`: bounds and config.
    ConnectorUpdated,
    /// `.../acledcontroller/v1/devices/updated`: LED brightness.
    LedUpdated,
    /// Aggregated power values; liveness only.
    Power,
    /// Our own heartbeat echoed back by the broker.
    Heartbeat,
    Other,
}

impl TopicKind {
    pub fn classify(topic: &str) -> Self {
        if topic.contains(CHARGING_CONTROLLER) {
            if topic.ends_with("/devices/updated") {
                return Self::ConnectorUpdated;
            }
            if let Some(device) = device_from_topic(topic) {
                if topic.ends_with("/state") {
                    return Self::ConnectorState { device };
                }
                if topic.ends_with("/property/chargingstate") {
                    return Self::ChargingState { device };
                }
            }
            return Self::Other;
        }
        if topic.contains(LED_CONTROLLER) && topic.ends_with("/devices/updated") {
            return Self::LedUpdated;
        }
        if topic.ends_with("/homeassistant/heartbeat") {
            return Self::Heartbeat;
        }
        if topic.ends_with("/power") {
            return Self::Power;
        }
        Self::Other
    }
}

/// Segment following `/devices/` in a topic.
fn device_from_topic(topic: &str) -> Option<String> {
    let (_, rest) = topic.split_once("/devices/")?;
    let device = rest.split('/').next()?;
    (!device.is_empty()).then(|| device.to_owned())
}

// ── FeedMessage ──────────────────────────────────────────────────────

/// A decoded message from the realtime feed.
#[derive(Debug, Clone)]
pub struct FeedMessage {
    pub topic: String,
    pub kind: TopicKind,
    /// The JSON payload, with any `jsonContent` wrapper already peeled off.
    pub payload: Value,
    pub received_at: DateTime<Utc>,
}

impl FeedMessage {
    /// Look up a top-level payload field, ignoring ASCII case.
    pub fn field(&self, name: &str) -> Option<&Value> {
        let map = self.payload.as_object()?;
        map.get(name).or_else(|| {
            map.iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v)
        })
    }
}

// ── Config ───────────────────────────────────────────────────────────

/// Broker connection parameters for one service location.
#[derive(Debug, Clone)]
pub struct MqttFeedConfig {
    pub host: String,
    pub port: u16,
    pub tls: bool,
    /// Used as topic root and as both username and password.
    pub service_location_uuid: String,
    /// Numeric id echoed in the heartbeat payload.
    pub service_location_id: String,
    pub client_id: String,
    /// Station serial sent in the tracking ping.
    pub serial_number: String,
    pub keep_alive: Duration,
    pub tracking_interval: Duration,
}

impl MqttFeedConfig {
    /// Topics subscribed after every (re)connect.
    pub fn subscriptions(&self) -> Vec<String> {
        let root = format!("servicelocation/{}", self.service_location_uuid);
        vec![
            format!("{root}/etc/carcharger/acchargingcontroller/v1/devices/+/state"),
            format!("{root}/etc/carcharger/acchargingcontroller/v1/devices/+/property/chargingstate"),
            format!("{root}/etc/carcharger/acchargingcontroller/v1/devices/updated"),
            format!("{root}/etc/led/acledcontroller/v1/devices/updated"),
            format!("{root}/homeassistant/heartbeat"),
            format!("{root}/power"),
        ]
    }

    fn tracking_topic(&self) -> String {
        format!("servicelocation/{}/tracking", self.service_location_uuid)
    }

    fn heartbeat_topic(&self) -> String {
        format!("servicelocation/{}/homeassistant/heartbeat", self.service_location_uuid)
    }

    fn tracking_payload(&self) -> Value {
        json!({
            "value": "ON",
            "clientId": self.client_id,
            "serialNumber": self.serial_number,
            "type": "RT_VALUES",
        })
    }

    fn heartbeat_payload(&self) -> Value {
        let id = self
            .service_location_id
            .parse::<i64>()
            .map_or_else(|_| Value::from(self.service_location_id.as_str()), Value::from);
        json!({ "serviceLocationId": id })
    }

    fn mqtt_options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(&self.client_id, &self.host, self.port);
        options
            .set_credentials(&self.service_location_uuid, &self.service_location_uuid)
            .set_keep_alive(self.keep_alive)
            .set_clean_session(true);
        if self.tls {
            options.set_transport(Transport::tls_with_default_config());
        }
        options
    }
}

/// Exponential backoff configuration for broker reconnection.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt. Default: 1s.
    pub initial_delay: Duration,

    /// Upper bound on backoff delay. Default: 60s.
    pub max_delay: Duration,

    /// Maximum reconnection attempts before giving up.
    /// `None` means retry forever.
    pub max_retries: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            max_retries: None,
        }
    }
}

/// Connection state of the feed, published through a `watch` channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedStatus {
    Connecting,
    Connected,
    Disconnected,
}

impl FeedStatus {
    pub fn is_connected(self) -> bool {
        self == Self::Connected
    }
}

// ── RealtimeHandle ───────────────────────────────────────────────────

/// Handle to a running MQTT feed.
///
/// Dropping the handle does not stop the background task; call
/// [`shutdown`](Self::shutdown) or cancel the token passed to `connect`.
pub struct RealtimeHandle {
    message_rx: broadcast::Receiver<Arc<FeedMessage>>,
    status_rx: watch::Receiver<FeedStatus>,
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

impl RealtimeHandle {
    /// Spawn the connection loop. The first connection attempt happens
    /// asynchronously; watch [`status`](Self::status) to observe it.
    pub fn connect(
        config: MqttFeedConfig,
        reconnect: ReconnectConfig,
        cancel: CancellationToken,
    ) -> Self {
        let (message_tx, message_rx) = broadcast::channel(MESSAGE_CHANNEL_CAPACITY);
        let (status_tx, status_rx) = watch::channel(FeedStatus::Connecting);

        let task_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            feed_loop(config, message_tx, status_tx, reconnect, task_cancel).await;
        });

        Self {
            message_rx,
            status_rx,
            cancel,
            task,
        }
    }

    /// A new receiver for decoded messages. Slow consumers see
    /// [`broadcast::error::RecvError::Lagged`].
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<FeedMessage>> {
        self.message_rx.resubscribe()
    }

    pub fn status(&self) -> watch::Receiver<FeedStatus> {
        self.status_rx.clone()
    }

    /// Signal the background task to stop.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Stop and wait for the background task to finish.
    pub async fn join(self) {
        self.cancel.cancel();
        let _ = self.task.await;
    }
}

// ── Background reconnection loop ─────────────────────────────────────

/// connect → read → backoff → reconnect.
async fn feed_loop(
    config: MqttFeedConfig,
    message_tx: broadcast::Sender<Arc<FeedMessage>>,
    status_tx: watch::Sender<FeedStatus>,
    reconnect: ReconnectConfig,
    cancel: CancellationToken,
) {
    let mut attempt: u32 = 0;

    loop {
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            result = connect_and_read(&config, &message_tx, &status_tx, &cancel) => result,
        };

        // A session that reached CONNACK starts the backoff over.
        let was_connected = status_tx.send_replace(FeedStatus::Disconnected).is_connected();
        if was_connected {
            attempt = 0;
        }

        if result.is_ok() && cancel.is_cancelled() {
            break;
        }
        let Some(delay) = reconnect_delay(&result, attempt, &reconnect) else {
            break;
        };
        tracing::info!(
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            attempt,
            "Waiting before reconnect"
        );

        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(delay) => {}
        }

        attempt = attempt.saturating_add(1);
    }

    status_tx.send_replace(FeedStatus::Disconnected);
    tracing::debug!("MQTT loop exiting");
}

// ── Single connection lifecycle ──────────────────────────────────────

/// Run one broker session until it drops or `cancel` fires.
async fn connect_and_read(
    config: &MqttFeedConfig,
    message_tx: &broadcast::Sender<Arc<FeedMessage>>,
    status_tx: &watch::Sender<FeedStatus>,
    cancel: &CancellationToken,
) -> Result<(), Error> {
    tracing::info!(host = %config.host, port = config.port, "Connecting to MQTT broker");
    status_tx.send_replace(FeedStatus::Connecting);

    let (client, mut eventloop) = AsyncClient::new(config.mqtt_options(), CLIENT_REQUEST_CAPACITY);

    // Queued now, sent by the event loop right after CONNACK.
    for topic in config.subscriptions() {
        client
            .subscribe(topic, QoS::AtLeastOnce)
            .await
            .map_err(|e| Error::Mqtt(e.to_string()))?;
    }

    let mut tracking = tokio::time::interval(config.tracking_interval);
    tracking.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut connected = false;

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                let _ = client.try_disconnect();
                return Ok(());
            }
            _ = tracking.tick(), if connected => {
                publish_keepalives(&client, config);
            }
            event = eventloop.poll() => {
                match event {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        tracing::info!("MQTT connected");
                        connected = true;
                        status_tx.send_replace(FeedStatus::Connected);
                        tracking.reset_immediately();
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        parse_and_broadcast(&publish.topic, &publish.payload, message_tx);
                    }
                    Ok(Event::Incoming(Packet::Disconnect)) => {
                        tracing::info!("MQTT broker sent disconnect");
                        return Ok(());
                    }
                    Ok(_) => {}
                    Err(e) => return Err(Error::Mqtt(e.to_string())),
                }
            }
        }
    }
}

/// Publish the tracking ping and heartbeat. Failures are logged only.
fn publish_keepalives(client: &AsyncClient, config: &MqttFeedConfig) {
    let pings = [
        (config.tracking_topic(), config.tracking_payload()),
        (config.heartbeat_topic(), config.heartbeat_payload()),
    ];
    for (topic, payload) in pings {
        match client.try_publish(topic, QoS::AtMostOnce, false, payload.to_string()) {
            Ok(()) => tracing::trace!("MQTT tracking ping queued"),
            Err(e) => tracing::debug!(error = %e, "MQTT tracking ping not queued"),
        }
    }
}

// ── Message parsing ──────────────────────────────────────────────────

/// Keys copied from the outer envelope onto a `jsonContent` payload.
const ENVELOPE_KEYS: [&str; 3] = ["deviceUUID", "messageType", "messsageType"];

/// Decode a raw payload. Non-JSON payloads yield `None`.
fn decode_payload(raw: &[u8]) -> Option<Value> {
    let mut payload: Value = serde_json::from_slice(raw).ok()?;

    let inner = payload
        .get("jsonContent")
        .and_then(Value::as_str)
        .and_then(|s| serde_json::from_str::<Value>(s).ok());

    if let Some(Value::Object(mut inner)) = inner {
        if let Value::Object(outer) = &payload {
            for key in ENVELOPE_KEYS {
                if let Some(v) = outer.get(key) {
                    inner.entry(key).or_insert_with(|| v.clone());
                }
            }
        }
        payload = Value::Object(inner);
    }

    Some(payload)
}

fn parse_and_broadcast(topic: &str, raw: &[u8], message_tx: &broadcast::Sender<Arc<FeedMessage>>) {
    tracing::trace!(topic, bytes = raw.len(), "MQTT message");

    let Some(payload) = decode_payload(raw) else {
        tracing::debug!(topic, "Dropping non-JSON MQTT payload");
        return;
    };

    let message = FeedMessage {
        topic: topic.to_owned(),
        kind: TopicKind::classify(topic),
        payload,
        received_at: Utc::now(),
    };

    // No subscribers right now is fine.
    let _ = message_tx.send(Arc::new(message));
}

// ── Backoff calculation ──────────────────────────────────────────────

/// `delay = min(initial * 2^attempt, max)`
/// Delay before the next session, or `None` once the retry limit is
/// reached. A clean session end backs off like an error.
fn reconnect_delay(
    result: &Result<(), Error>,
    attempt: u32,
    reconnect: &ReconnectConfig,
) -> Option<Duration> {
    match result {
        Ok(()) => tracing::info!("MQTT session ended, reconnecting"),
        Err(e) => tracing::warn!(error = %e, attempt, "MQTT connection error"),
    }
    if let Some(max) = reconnect.max_retries {
        if attempt >= max {
            tracing::error!(max_retries = max, "MQTT reconnection limit reached, giving up");
            return None;
        }
    }
    Some(calculate_backoff(attempt, reconnect))
}

fn calculate_backoff(attempt: u32, config: &ReconnectConfig) -> Duration {
    let factor = 2u32.saturating_pow(attempt.min(31));
    config
        .initial_delay
        .saturating_mul(factor)
        .min(config.max_delay)
}

// ── Tests ────────────────────────────────────────────────────────────
