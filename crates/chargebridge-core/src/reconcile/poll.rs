// ── Poll reconciler ──
//
// Fetches every connector's smart device on a fixed interval and merges
// the result as a poll update. Failures never clear cached values; a
// run of consecutive failures only flags the connector as stale.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chargebridge_api::models::{SmartDevice, spec};
use chrono::{DateTime, Utc};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{as_pct, as_text, as_u32};
use crate::error::CoreError;
use crate::gateway::CommandGateway;
use crate::model::{
    Capabilities, ChargingMode, ConnectorId, ConnectorIdentity, CurrentBounds, SessionState,
};
use crate::store::{ConnectorPatch, StateStore};

/// Brightness assumed when the LED controller reports nothing usable.
const DEFAULT_LED_BRIGHTNESS: u32 = 70;

/// Outcome of one poll pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollReport {
    pub refreshed: Vec<ConnectorId>,
    pub failed: Vec<ConnectorId>,
    /// Connectors that crossed the failure threshold during this pass.
    pub marked_stale: Vec<ConnectorId>,
}

pub struct PollReconciler {
    store: Arc<StateStore>,
    gateway: Arc<CommandGateway>,
    stale_after: u32,
    failures: Mutex<HashMap<ConnectorId, u32>>,
}

impl PollReconciler {
    pub fn new(store: Arc<StateStore>, gateway: Arc<CommandGateway>, stale_after: u32) -> Self {
        Self {
            store,
            gateway,
            stale_after: stale_after.max(1),
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Poll the station and every registered connector once.
    pub async fn poll_once(&self) -> PollReport {
        self.scan_station().await;

        let mut report = PollReport::default();
        for id in self.store.ids() {
            match self.poll_connector(&id).await {
                Ok(()) => {
                    self.reset_failures(&id);
                    report.refreshed.push(id);
                }
                Err(e) => {
                    let failures = self.record_failure(&id);
                    warn!(connector = %id, failures, error = %e, "poll failed, keeping cached state");
                    if failures >= self.stale_after {
                        match self.store.mark_stale(&id) {
                            Ok(true) => {
                                warn!(connector = %id, "connector marked stale");
                                report.marked_stale.push(id.clone());
                            }
                            Ok(false) => {}
                            Err(e) => debug!(connector = %id, error = %e, "could not mark stale"),
                        }
                    }
                    report.failed.push(id);
                }
            }
        }
        report
    }

    /// Fetch one connector and merge it. The update is stamped with the
    /// time the fetch started.
    pub async fn poll_connector(&self, id: &ConnectorId) -> Result<(), CoreError> {
        let snapshot = self.store.get(id).ok_or_else(|| CoreError::not_found(id))?;
        let fetched_at = Utc::now();
        let device = self
            .gateway
            .fetch_device(&snapshot.identity.smart_device_id)
            .await?;
        let patch = device_patch(&device, snapshot.bounds);
        self.store.apply_poll(id, patch, fetched_at)?;
        Ok(())
    }

    /// Consecutive failures currently counted for a connector.
    pub fn failures(&self, id: &ConnectorId) -> u32 {
        self.lock_failures().get(id).copied().unwrap_or(0)
    }

    pub fn reset(&self) {
        self.lock_failures().clear();
    }

    // ── Station scan ─────────────────────────────────────────────────

    /// Read the LED brightness from the station's LED controller and
    /// remember that device as the `setBrightness` target. Failures are
    /// logged only; connector polls decide staleness.
    async fn scan_station(&self) {
        let fetched_at = Utc::now();
        let devices = match self.gateway.list_devices().await {
            Ok(devices) => devices,
            Err(e) => {
                warn!(error = %e, "station scan failed");
                return;
            }
        };
        let Some((uuid, brightness)) = led_controller(&devices) else {
            debug!("no LED controller among smart devices");
            return;
        };

        if self.gateway.led_device().is_none() {
            if let Some(uuid) = uuid {
                info!(device = %uuid, "LED controller discovered");
                self.gateway.set_led_device(Some(uuid));
            }
        }
        self.apply_station(brightness, fetched_at);
    }

    fn apply_station(&self, brightness: u32, fetched_at: DateTime<Utc>) {
        for id in self.store.ids() {
            let patch = ConnectorPatch {
                led_brightness: Some(brightness),
                ..ConnectorPatch::default()
            };
            if let Err(e) = self.store.apply_station(&id, patch, fetched_at) {
                debug!(connector = %id, error = %e, "station update skipped");
            }
        }
    }

    // ── Failure bookkeeping ──────────────────────────────────────────

    fn lock_failures(&self) -> std::sync::MutexGuard<'_, HashMap<ConnectorId, u32>> {
        self.failures.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record_failure(&self, id: &ConnectorId) -> u32 {
        let mut failures = self.lock_failures();
        let count = failures.entry(id.clone()).or_insert(0);
        *count = count.saturating_add(1);
        *count
    }

    fn reset_failures(&self, id: &ConnectorId) {
        self.lock_failures().remove(id);
    }
}

// ── Payload translation ──────────────────────────────────────────────

/// Translate a smart device into a patch. Bounds reported in the same
/// payload take precedence over `known` when deriving amps.
pub(crate) fn device_patch(device: &SmartDevice, known: CurrentBounds) -> ConnectorPatch {
    let min_current = device.configuration(spec::MIN_CURRENT).and_then(as_u32);
    let max_current = device.configuration(spec::MAX_CURRENT).and_then(as_u32);
    let bounds = CurrentBounds {
        min: min_current.unwrap_or(known.min),
        max: max_current.unwrap_or(known.max),
    };

    let percentage_limit = device.property(spec::PERCENTAGE_LIMIT).and_then(as_pct);
    let raw_mode = device.property(spec::CHARGING_MODE).and_then(as_text);
    let paused = raw_mode.is_some_and(|m| m.eq_ignore_ascii_case("PAUSED"));
    let session_state = if paused {
        Some(SessionState::Paused)
    } else {
        device
            .property(spec::CHARGING_STATE)
            .and_then(as_text)
            .map(SessionState::parse)
    };

    ConnectorPatch {
        mode: device
            .property(spec::OPTIMIZATION_STRATEGY)
            .and_then(as_text)
            .map(ChargingMode::from_strategy),
        current_limit_amps: percentage_limit.map(|pct| bounds.to_amps(pct)),
        percentage_limit,
        session_state,
        min_surplus_pct: device.configuration(spec::MIN_EXCESS_PCT).and_then(as_pct),
        min_current,
        max_current,
        ..ConnectorPatch::default()
    }
}

/// The LED controller's uuid and brightness, if any device carries the
/// brightness configuration.
fn led_controller(devices: &[SmartDevice]) -> Option<(Option<String>, u32)> {
    let device = devices
        .iter()
        .find(|d| d.has_configuration(spec::LED_BRIGHTNESS))?;
    let brightness = device
        .configuration(spec::LED_BRIGHTNESS)
        .and_then(as_pct)
        .unwrap_or(DEFAULT_LED_BRIGHTNESS);
    Some((device.uuid.clone(), brightness))
}

/// Charging controllers among a service location's smart devices: every
/// device with a max-current configuration. Numbering follows the
/// charger-number property, falling back to discovery order.
pub fn discover_connectors(
    devices: &[SmartDevice],
    station_serial: &str,
) -> Vec<(ConnectorIdentity, Capabilities)> {
    let mut found: Vec<(ConnectorIdentity, Capabilities)> = devices
        .iter()
        .filter(|d| d.has_configuration(spec::MAX_CURRENT))
        .filter_map(|d| Some((d.uuid.clone()?, d.id_string()?, d)))
        .zip(1u32..)
        .map(|((uuid, smart_device_id, device), position)| {
            let connector_number = device
                .configuration(spec::CHARGER_NUMBER)
                .and_then(as_u32)
                .unwrap_or(position);
            (
                ConnectorIdentity {
                    id: ConnectorId::new(uuid),
                    smart_device_id,
                    connector_number,
                    station_serial: station_serial.to_owned(),
                },
                Capabilities::default(),
            )
        })
        .collect();
    found.sort_by_key(|(identity, _)| identity.connector_number);
    found
}

// ── Background loop ──────────────────────────────────────────────────

/// Poll every `period` until cancelled. The first pass is the caller's.
pub(crate) async fn poll_loop(
    poller: Arc<PollReconciler>,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    report = poller.poll_once() => {
                        debug!(
                            refreshed = report.refreshed.len(),
                            failed = report.failed.len(),
                            "poll pass complete"
                        );
                    }
                }
            }
        }
    }
    debug!("poll loop stopped");
}
