// ── Realtime reconciler ──
//
// Applies push-feed messages to the store field by field. A field that
// fails to parse is dropped on its own; the rest of the message still
// lands. Some derivations (pause detection, whether a percentage limit
// applies) need context from earlier messages, kept as per-connector
// hints. Power readings are mapped to connectors through the metering
// channels loaded at connect.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chargebridge_api::models::{MeteringConfiguration, json_int, spec};
use chargebridge_api::{FeedMessage, FeedStatus, RealtimeHandle, TopicKind};
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{as_pct, as_text, as_u32};
use crate::model::{
    ChargingMode, ConnectorId, CurrentBounds, EvccState, Metering, MeteringChannels, SessionState,
};
use crate::store::{ConnectorPatch, MergeOutcome, StateStore};

/// Strategy value under which the feed's percentage limit is meaningful.
const STRATEGY_NONE: &str = "NONE";

#[derive(Debug, Clone, Default)]
struct Hints {
    raw_mode: Option<String>,
    strategy: Option<String>,
    state: Option<String>,
    cause: Option<String>,
}

impl Hints {
    fn is_paused(&self) -> bool {
        if self
            .raw_mode
            .as_deref()
            .is_some_and(|m| m.eq_ignore_ascii_case("PAUSED"))
        {
            return true;
        }
        let suspended = self
            .state
            .as_deref()
            .is_some_and(|s| s.eq_ignore_ascii_case("SUSPENDED"));
        let by_evse = self
            .cause
            .as_deref()
            .is_some_and(|c| c.to_ascii_uppercase().starts_with("SUSPENDED_EVSE"));
        suspended && by_evse
    }

    fn percentage_applies(&self) -> bool {
        self.strategy
            .as_deref()
            .is_some_and(|s| s.eq_ignore_ascii_case(STRATEGY_NONE))
    }
}

pub struct RealtimeReconciler {
    store: Arc<StateStore>,
    hints: Mutex<HashMap<ConnectorId, Hints>>,
    channels: Mutex<HashMap<ConnectorId, MeteringChannels>>,
}

impl RealtimeReconciler {
    pub fn new(store: Arc<StateStore>) -> Self {
        Self {
            store,
            hints: Mutex::new(HashMap::new()),
            channels: Mutex::new(HashMap::new()),
        }
    }

    pub fn reset(&self) {
        self.lock_hints().clear();
        self.lock_channels().clear();
    }

    /// Replace the connector slots used to read `power` messages.
    pub fn set_metering_channels(&self, channels: HashMap<ConnectorId, MeteringChannels>) {
        *self.lock_channels() = channels;
    }

    /// Apply one feed message. Returns the merge outcome per connector
    /// touched; messages for unknown devices touch nothing.
    pub fn apply(&self, message: &FeedMessage) -> Vec<(ConnectorId, MergeOutcome)> {
        self.store.touch_realtime(message.received_at);

        let patches: Vec<(ConnectorId, ConnectorPatch)> = match &message.kind {
            TopicKind::ConnectorState { device } => self
                .known(device)
                .map(|id| {
                    let patch = connector_state_patch(&id, message);
                    vec![(id, patch)]
                })
                .unwrap_or_default(),
            TopicKind::ChargingState { device } => self
                .known(device)
                .map(|id| {
                    let patch = self.charging_state_patch(&id, message);
                    vec![(id, patch)]
                })
                .unwrap_or_default(),
            TopicKind::ConnectorUpdated => message
                .field("deviceUUID")
                .and_then(as_text)
                .and_then(|device| self.known(device))
                .map(|id| {
                    let patch = self.connector_updated_patch(&id, message);
                    vec![(id, patch)]
                })
                .unwrap_or_default(),
            TopicKind::LedUpdated => led_brightness(message)
                .map(|brightness| {
                    self.store
                        .ids()
                        .into_iter()
                        .map(|id| {
                            let patch = ConnectorPatch {
                                led_brightness: Some(brightness),
                                ..ConnectorPatch::default()
                            };
                            (id, patch)
                        })
                        .collect()
                })
                .unwrap_or_default(),
            TopicKind::Power => self.power_patches(message),
            TopicKind::Heartbeat | TopicKind::Other => Vec::new(),
        };

        patches
            .into_iter()
            .filter_map(|(id, patch)| {
                match self.store.apply_realtime(&id, patch, message.received_at) {
                    Ok(outcome) => Some((id, outcome)),
                    Err(e) => {
                        debug!(connector = %id, error = %e, "realtime update dropped");
                        None
                    }
                }
            })
            .collect()
    }

    // ── Per-topic translation ────────────────────────────────────────

    fn charging_state_patch(&self, id: &ConnectorId, message: &FeedMessage) -> ConnectorPatch {
        let mut patch = ConnectorPatch::default();
        let mut hints = self.lock_hints();
        let hints = hints.entry(id.clone()).or_default();

        let state = text_field(id, message, "chargingState");
        let cause = message
            .field("status")
            .and_then(|status| status.get("current"))
            .and_then(as_text);
        let raw_mode = text_field(id, message, "chargingMode");

        if let Some(state) = state {
            hints.state = Some(state.to_owned());
            patch.session_state = Some(SessionState::parse(state));
        }
        if let Some(cause) = cause {
            hints.cause = Some(cause.to_owned());
        }
        if let Some(raw_mode) = raw_mode {
            hints.raw_mode = Some(raw_mode.to_owned());
        }
        if (state.is_some() || cause.is_some() || raw_mode.is_some()) && hints.is_paused() {
            patch.session_state = Some(SessionState::Paused);
        }

        if let Some(iec) = message.field("iecStatus") {
            let current = iec.get("current").unwrap_or(iec);
            patch.evcc_state = as_text(current).and_then(EvccState::from_iec);
            if patch.evcc_state.is_none() {
                malformed(id, "iecStatus", iec);
            }
        }

        if let Some(strategy) = text_field(id, message, "optimizationStrategy") {
            hints.strategy = Some(strategy.to_owned());
            patch.mode = Some(ChargingMode::from_strategy(strategy));
        }

        if let Some(raw) = message.field(spec::PERCENTAGE_LIMIT) {
            match as_pct(raw) {
                Some(pct) if hints.percentage_applies() => {
                    patch.percentage_limit = Some(pct);
                    patch.current_limit_amps = Some(self.bounds(id, None, None).to_amps(pct));
                }
                Some(_) => {}
                None => malformed(id, spec::PERCENTAGE_LIMIT, raw),
            }
        }

        if let Some(raw) = message.field("available") {
            patch.available = as_bool(raw);
            if patch.available.is_none() {
                malformed(id, "available", raw);
            }
        }

        patch
    }

    fn connector_updated_patch(&self, id: &ConnectorId, message: &FeedMessage) -> ConnectorPatch {
        let mut patch = ConnectorPatch {
            min_current: u32_field(id, message, "minimumCurrent"),
            max_current: u32_field(id, message, "maximumCurrent"),
            ..ConnectorPatch::default()
        };

        if let Some(custom) = message.field("customConfigurationProperties") {
            if let Some(raw) = custom.get(spec::MIN_EXCESS_PCT) {
                patch.min_surplus_pct = as_pct(raw);
                if patch.min_surplus_pct.is_none() {
                    malformed(id, spec::MIN_EXCESS_PCT, raw);
                }
            }
        }

        if let Some(raw) = message.field(spec::PERCENTAGE_LIMIT) {
            let applies = self
                .lock_hints()
                .get(id)
                .is_some_and(Hints::percentage_applies);
            match as_pct(raw) {
                Some(pct) if applies => {
                    let bounds = self.bounds(id, patch.min_current, patch.max_current);
                    patch.percentage_limit = Some(pct);
                    patch.current_limit_amps = Some(bounds.to_amps(pct));
                }
                Some(_) => {}
                None => malformed(id, spec::PERCENTAGE_LIMIT, raw),
            }
        }

        patch
    }

    fn power_patches(&self, message: &FeedMessage) -> Vec<(ConnectorId, ConnectorPatch)> {
        self.lock_channels()
            .iter()
            .filter(|(id, _)| self.store.get(id).is_some())
            .filter_map(|(id, channels)| {
                let metering = read_metering(channels, message)?;
                let patch = ConnectorPatch {
                    metering: Some(metering),
                    ..ConnectorPatch::default()
                };
                Some((id.clone(), patch))
            })
            .collect()
    }

    // ── Helpers ──────────────────────────────────────────────────────

    fn known(&self, device: &str) -> Option<ConnectorId> {
        let id = ConnectorId::from(device);
        self.store.get(&id).map(|_| id)
    }

    fn bounds(&self, id: &ConnectorId, min: Option<u32>, max: Option<u32>) -> CurrentBounds {
        let known = self
            .store
            .get(id)
            .map(|snapshot| snapshot.bounds)
            .unwrap_or_default();
        CurrentBounds {
            min: min.unwrap_or(known.min),
            max: max.unwrap_or(known.max),
        }
    }

    fn lock_hints(&self) -> std::sync::MutexGuard<'_, HashMap<ConnectorId, Hints>> {
        self.hints.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_channels(&self) -> std::sync::MutexGuard<'_, HashMap<ConnectorId, MeteringChannels>> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ── Metering ─────────────────────────────────────────────────────────

/// Connector slots from the metering configuration. Chargers without a
/// uuid or without any channel are skipped.
pub fn metering_channels(config: &MeteringConfiguration) -> HashMap<ConnectorId, MeteringChannels> {
    config
        .chargers()
        .filter_map(|charger| {
            let channels = MeteringChannels {
                power: charger.power_indexes(),
                consumption: charger.consumption_indexes(),
            };
            let uuid = charger.uuid.as_deref()?;
            (!channels.is_empty()).then(|| (ConnectorId::from(uuid), channels))
        })
        .collect()
}

/// Read a connector's slots out of a `power` message. Slots past the end
/// of an array read as zero; a message without the arrays yields `None`.
fn read_metering(channels: &MeteringChannels, message: &FeedMessage) -> Option<Metering> {
    let active = message.field("activePowerData").and_then(Value::as_array);
    let currents_ma = message.field("currentData").and_then(Value::as_array);
    let import_wh = message.field("importActiveEnergyData").and_then(Value::as_array);
    if active.is_none() && currents_ma.is_none() && import_wh.is_none() {
        return None;
    }

    let power_phases_w = pick(active, &channels.power);
    let current_phases_a = pick(currents_ma, &channels.power)
        .into_iter()
        .map(milli_to_unit)
        .collect();
    let energy_import_kwh = (!channels.consumption.is_empty())
        .then(|| milli_to_unit(pick(import_wh, &channels.consumption).iter().sum()));

    Some(Metering {
        power_total_w: (!power_phases_w.is_empty()).then(|| power_phases_w.iter().sum()),
        power_phases_w,
        current_phases_a,
        energy_import_kwh,
    })
}

/// Values at `slots`, zero-filled. Empty when the array is missing.
fn pick(values: Option<&Vec<Value>>, slots: &[usize]) -> Vec<i64> {
    let Some(values) = values else {
        return Vec::new();
    };
    slots
        .iter()
        .map(|&i| values.get(i).and_then(json_int).unwrap_or(0))
        .collect()
}

/// mA to A, Wh to kWh.
#[allow(clippy::cast_precision_loss, clippy::as_conversions)]
fn milli_to_unit(value: i64) -> f64 {
    value as f64 / 1000.0
}

fn connector_state_patch(id: &ConnectorId, message: &FeedMessage) -> ConnectorPatch {
    let mut patch = ConnectorPatch {
        connection_status: text_field(id, message, "connectionStatus").map(str::to_owned),
        ..ConnectorPatch::default()
    };
    if let Some(raw) = message.field("configurationErrors") {
        match raw.as_array() {
            Some(errors) => {
                patch.configuration_errors = Some(
                    errors
                        .iter()
                        .map(|e| e.as_str().map_or_else(|| e.to_string(), str::to_owned))
                        .collect(),
                );
            }
            None => malformed(id, "configurationErrors", raw),
        }
    }
    patch
}

fn led_brightness(message: &FeedMessage) -> Option<u32> {
    message
        .field("configurationPropertyValues")?
        .as_array()?
        .iter()
        .find(|entry| {
            entry.get("propertySpecName").and_then(Value::as_str) == Some(spec::LED_BRIGHTNESS)
        })?
        .get("value")
        .and_then(as_pct)
}

fn text_field<'a>(id: &ConnectorId, message: &'a FeedMessage, name: &str) -> Option<&'a str> {
    let raw = message.field(name)?;
    let text = as_text(raw);
    if text.is_none() {
        malformed(id, name, raw);
    }
    text
}

fn u32_field(id: &ConnectorId, message: &FeedMessage, name: &str) -> Option<u32> {
    let raw = message.field(name)?;
    let value = as_u32(raw);
    if value.is_none() {
        malformed(id, name, raw);
    }
    value
}

fn as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) if s.eq_ignore_ascii_case("true") => Some(true),
        Value::String(s) if s.eq_ignore_ascii_case("false") => Some(false),
        _ => None,
    }
}

fn malformed(id: &ConnectorId, field: &str, raw: &Value) {
    debug!(connector = %id, field, value = %raw, "dropping malformed field");
}

// ── Background loop ──────────────────────────────────────────────────

/// Feed messages and connection status into the store until cancelled,
/// then stop the feed.
/// How long the feed may be down before health reports it: two tracking
/// periods, at least ten seconds.
pub fn feed_grace(tracking_interval: Duration) -> Duration {
    tracking_interval.saturating_mul(2).max(Duration::from_secs(10))
}

/// Time left before a dropped feed counts as down, measured from the
/// last message. `None` once the grace is spent or nothing ever arrived.
fn grace_left(last_message_at: Option<DateTime<Utc>>, now: DateTime<Utc>, grace: Duration) -> Option<Duration> {
    let elapsed = (now - last_message_at?).to_std().unwrap_or_default();
    grace.checked_sub(elapsed).filter(|left| !left.is_zero())
}

pub(crate) async fn realtime_loop(
    reconciler: Arc<RealtimeReconciler>,
    handle: RealtimeHandle,
    grace: Duration,
    cancel: CancellationToken,
) {
    let mut messages = handle.subscribe();
    let mut status = handle.status();
    let store = Arc::clone(&reconciler.store);
    let mut down_check: Option<tokio::time::Instant> = None;

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *status.borrow_and_update();
                match current {
                    FeedStatus::Connected => info!("realtime feed connected"),
                    FeedStatus::Disconnected => warn!("realtime feed disconnected"),
                    FeedStatus::Connecting => debug!("realtime feed connecting"),
                }
                if current.is_connected() {
                    down_check = None;
                    store.set_realtime_connected(true);
                } else if down_check.is_none() {
                    down_check = report_down(&store, grace);
                }
            }
            () = tokio::time::sleep_until(down_check.unwrap_or_else(tokio::time::Instant::now)), if down_check.is_some() => {
                down_check = if status.borrow().is_connected() {
                    None
                } else {
                    report_down(&store, grace)
                };
            }
            received = messages.recv() => match received {
                Ok(message) => {
                    reconciler.apply(&message);
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "realtime consumer lagged, messages dropped");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    handle.join().await;
    store.set_realtime_connected(false);
    debug!("realtime loop stopped");
}

/// Mark the feed down unless a recent message keeps it within grace.
/// Returns when to look again.
fn report_down(store: &StateStore, grace: Duration) -> Option<tokio::time::Instant> {
    let last = store.realtime_health().borrow().last_message_at;
    match grace_left(last, Utc::now(), grace) {
        Some(left) => {
            debug!(?left, "realtime feed within grace");
            Some(tokio::time::Instant::now() + left)
        }
        None => {
            store.set_realtime_connected(false);
            None
        }
    }
}
