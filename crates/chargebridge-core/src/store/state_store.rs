// ── Central state store ──
//
// Readers load an `ArcSwap`ed snapshot and never take the record lock.
// Writers serialize per connector on a short `std` mutex, rebuild that
// connector's snapshot, then republish the collection on a `watch`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use arc_swap::ArcSwap;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::watch;
use tracing::debug;

use super::record::{ConnectorPatch, ConnectorRecord, MergeOutcome};
use super::stamped::Source;
use crate::error::CoreError;
use crate::model::{
    Capabilities, ConnectorId, ConnectorIdentity, ConnectorSnapshot, FirmwareGeneration,
    StaleStateWarning,
};
use crate::stream::SnapshotStream;

/// Health of the push feed, consumed by external health sensors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RealtimeHealth {
    pub connected: bool,
    pub last_message_at: Option<DateTime<Utc>>,
}

struct Slot {
    record: Mutex<ConnectorRecord>,
    current: ArcSwap<ConnectorSnapshot>,
}

impl Slot {
    fn lock(&self) -> MutexGuard<'_, ConnectorRecord> {
        self.record.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The authoritative in-memory view of every registered connector.
///
/// Internally synchronized; share it behind an `Arc`.
pub struct StateStore {
    slots: DashMap<ConnectorId, Arc<Slot>>,
    snapshot: watch::Sender<Arc<Vec<Arc<ConnectorSnapshot>>>>,
    realtime: watch::Sender<RealtimeHealth>,
    tick: Duration,
}

impl StateStore {
    /// `tick` is the window within which realtime beats poll regardless
    /// of timestamp order.
    pub fn new(tick: Duration) -> Self {
        let (snapshot, _) = watch::channel(Arc::new(Vec::new()));
        let (realtime, _) = watch::channel(RealtimeHealth::default());
        Self {
            slots: DashMap::new(),
            snapshot,
            realtime,
            tick,
        }
    }

    pub fn tick(&self) -> Duration {
        self.tick
    }

    // ── Registration ─────────────────────────────────────────────────

    /// Add a connector, or refresh its descriptor if already known.
    /// Returns `true` if the connector was new.
    pub fn register(
        &self,
        identity: ConnectorIdentity,
        capabilities: Capabilities,
        firmware: FirmwareGeneration,
    ) -> bool {
        let id = identity.id.clone();
        if let Some(slot) = self.slot(&id) {
            let mut record = slot.lock();
            record.set_descriptor(identity, capabilities, firmware);
            slot.current.store(Arc::new(record.snapshot()));
            drop(record);
            self.publish();
            return false;
        }

        let record = ConnectorRecord::new(identity, capabilities, firmware);
        let slot = Arc::new(Slot {
            current: ArcSwap::from_pointee(record.snapshot()),
            record: Mutex::new(record),
        });
        self.slots.insert(id, slot);
        self.publish();
        true
    }

    /// Forget every connector. Used by reload.
    pub fn clear(&self) {
        self.slots.clear();
        self.publish();
    }

    // ── Reads ────────────────────────────────────────────────────────

    pub fn get(&self, id: &ConnectorId) -> Option<Arc<ConnectorSnapshot>> {
        self.slot(id).map(|slot| slot.current.load_full())
    }

    /// All connectors, ordered by station serial then connector number.
    pub fn snapshots(&self) -> Arc<Vec<Arc<ConnectorSnapshot>>> {
        self.snapshot.borrow().clone()
    }

    pub fn ids(&self) -> Vec<ConnectorId> {
        self.snapshots().iter().map(|s| s.id().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn subscribe(&self) -> SnapshotStream {
        SnapshotStream::new(self.snapshot.subscribe())
    }

    /// Advisory warnings for connectors not confirmed within `window`.
    pub fn stale_warnings(&self, now: DateTime<Utc>, window: Duration) -> Vec<StaleStateWarning> {
        self.snapshots()
            .iter()
            .filter_map(|s| s.staleness(now, window))
            .collect()
    }

    // ── Merges ───────────────────────────────────────────────────────

    /// Merge a poll result fetched at `fetched_at`. Clears the stale flag.
    pub fn apply_poll(
        &self,
        id: &ConnectorId,
        patch: ConnectorPatch,
        fetched_at: DateTime<Utc>,
    ) -> Result<MergeOutcome, CoreError> {
        self.apply(id, patch, fetched_at, Source::Poll, true)
    }

    /// Merge station-wide values (LED brightness) read by the station
    /// scan. Merged like a poll, but it says nothing about the connector
    /// itself: the stale flag and `last_polled_at` are untouched.
    pub fn apply_station(
        &self,
        id: &ConnectorId,
        patch: ConnectorPatch,
        fetched_at: DateTime<Utc>,
    ) -> Result<MergeOutcome, CoreError> {
        self.apply(id, patch, fetched_at, Source::Poll, false)
    }

    /// Merge a realtime message received at `received_at`.
    pub fn apply_realtime(
        &self,
        id: &ConnectorId,
        patch: ConnectorPatch,
        received_at: DateTime<Utc>,
    ) -> Result<MergeOutcome, CoreError> {
        self.apply(id, patch, received_at, Source::Realtime, true)
    }

    /// Merge the local echo of a command confirmed at `confirmed_at`.
    pub fn apply_optimistic(
        &self,
        id: &ConnectorId,
        patch: ConnectorPatch,
        confirmed_at: DateTime<Utc>,
    ) -> Result<MergeOutcome, CoreError> {
        self.apply(id, patch, confirmed_at, Source::Optimistic, true)
    }

    /// Flag a connector as stale without touching its cached values.
    /// Returns `true` if the flag was newly set.
    pub fn mark_stale(&self, id: &ConnectorId) -> Result<bool, CoreError> {
        let slot = self.slot(id).ok_or_else(|| CoreError::not_found(id))?;
        let mut record = slot.lock();
        if !record.mark_stale() {
            return Ok(false);
        }
        slot.current.store(Arc::new(record.snapshot()));
        drop(record);
        self.publish();
        Ok(true)
    }

    // ── Realtime health ──────────────────────────────────────────────

    pub fn realtime_health(&self) -> watch::Receiver<RealtimeHealth> {
        self.realtime.subscribe()
    }

    pub fn set_realtime_connected(&self, connected: bool) {
        self.realtime.send_if_modified(|health| {
            let changed = health.connected != connected;
            health.connected = connected;
            changed
        });
    }

    /// Record that a feed message arrived, whether or not it addressed a
    /// known connector.
    pub fn touch_realtime(&self, at: DateTime<Utc>) {
        self.realtime.send_modify(|health| {
            health.last_message_at = health.last_message_at.max(Some(at));
        });
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn slot(&self, id: &ConnectorId) -> Option<Arc<Slot>> {
        self.slots.get(id).map(|r| Arc::clone(r.value()))
    }

    fn apply(
        &self,
        id: &ConnectorId,
        patch: ConnectorPatch,
        at: DateTime<Utc>,
        source: Source,
        confirms: bool,
    ) -> Result<MergeOutcome, CoreError> {
        let slot = self.slot(id).ok_or_else(|| CoreError::not_found(id))?;
        let mut record = slot.lock();
        let outcome = if confirms {
            record.apply(patch, at, source, self.tick)
        } else {
            record.merge(patch, at, source, self.tick)
        };
        slot.current.store(Arc::new(record.snapshot()));
        drop(record);

        if !outcome.rejected.is_empty() {
            debug!(
                connector = %id,
                %source,
                rejected = ?outcome.rejected,
                "fresher values kept"
            );
        }
        self.publish();
        Ok(outcome)
    }

    /// Rebuild the collection inside `send_modify` so concurrent writers
    /// publish in lock order and the last one sees every slot.
    fn publish(&self) {
        self.snapshot.send_modify(|snap| {
            let mut values: Vec<Arc<ConnectorSnapshot>> = self
                .slots
                .iter()
                .map(|r| r.value().current.load_full())
                .collect();
            values.sort_by(|a, b| {
                (&a.identity.station_serial, a.identity.connector_number, a.id()).cmp(&(
                    &b.identity.station_serial,
                    b.identity.connector_number,
                    b.id(),
                ))
            });
            *snap = Arc::new(values);
        });
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::model::{Availability, ChargingMode, SessionState};

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).single().unwrap()
    }

    fn identity(uuid: &str, number: u32) -> ConnectorIdentity {
        ConnectorIdentity {
            id: ConnectorId::from(uuid),
            smart_device_id: format!("{number}0"),
            connector_number: number,
            station_serial: "5010000123".into(),
        }
    }

    fn store_with(ids: &[(&str, u32)]) -> StateStore {
        let store = StateStore::new(Duration::seconds(1));
        for (uuid, number) in ids {
            store.register(identity(uuid, *number), Capabilities::default(), FirmwareGeneration::Current);
        }
        store
    }

    #[test]
    fn register_is_idempotent() {
        let store = store_with(&[("a", 1)]);
        assert!(!store.register(identity("a", 1), Capabilities::default(), FirmwareGeneration::Legacy));
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&"a".into()).unwrap().firmware, FirmwareGeneration::Legacy);
    }

    #[test]
    fn snapshots_are_ordered_by_connector_number() {
        let store = store_with(&[("z", 1), ("b", 2), ("m", 3)]);
        let ids: Vec<String> = store.ids().iter().map(ToString::to_string).collect();
        assert_eq!(ids, vec!["z", "b", "m"]);
    }

    #[test]
    fn stale_poll_does_not_roll_back_optimistic_mode() {
        let store = store_with(&[("a", 1)]);
        let id = ConnectorId::from("a");

        store
            .apply_poll(
                &id,
                ConnectorPatch {
                    mode: Some(ChargingMode::Solar),
                    min_surplus_pct: Some(25),
                    ..Default::default()
                },
                t(10),
            )
            .unwrap();

        store
            .apply_optimistic(
                &id,
                ConnectorPatch {
                    mode: Some(ChargingMode::Normal),
                    current_limit_amps: Some(16),
                    ..Default::default()
                },
                t(12),
            )
            .unwrap();

        let outcome = store
            .apply_poll(
                &id,
                ConnectorPatch {
                    mode: Some(ChargingMode::Solar),
                    current_limit_amps: Some(10),
                    min_surplus_pct: Some(25),
                    ..Default::default()
                },
                t(9),
            )
            .unwrap();

        assert!(outcome.was_rejected("mode"));
        assert!(outcome.was_rejected("current_limit_amps"));
        let snap = store.get(&id).unwrap();
        assert_eq!(snap.mode, Some(ChargingMode::Normal));
        assert_eq!(snap.current_limit_amps, Some(16));
        assert_eq!(snap.min_surplus_pct, Some(25));
    }

    #[test]
    fn stale_flag_keeps_values_and_clears_on_poll() {
        let store = store_with(&[("a", 1)]);
        let id = ConnectorId::from("a");
        store
            .apply_poll(
                &id,
                ConnectorPatch {
                    mode: Some(ChargingMode::Normal),
                    current_limit_amps: Some(20),
                    available: Some(true),
                    ..Default::default()
                },
                t(0),
            )
            .unwrap();

        store.mark_stale(&id).unwrap();
        let snap = store.get(&id).unwrap();
        assert!(snap.stale);
        assert_eq!(snap.availability(), Availability::Unknown);
        assert_eq!(snap.mode, Some(ChargingMode::Normal));
        assert_eq!(snap.current_limit_amps, Some(20));

        store.apply_realtime(&id, ConnectorPatch::default(), t(5)).unwrap();
        assert!(store.get(&id).unwrap().stale);

        store.apply_poll(&id, ConnectorPatch::default(), t(30)).unwrap();
        let snap = store.get(&id).unwrap();
        assert!(!snap.stale);
        assert_eq!(snap.last_polled_at, Some(t(30)));
    }

    #[test]
    fn station_values_do_not_clear_stale() {
        let store = store_with(&[("a", 1)]);
        let id = ConnectorId::from("a");
        store.apply_poll(&id, ConnectorPatch::default(), t(0)).unwrap();
        assert!(store.mark_stale(&id).unwrap());
        assert!(!store.mark_stale(&id).unwrap());

        store
            .apply_station(
                &id,
                ConnectorPatch {
                    led_brightness: Some(40),
                    ..Default::default()
                },
                t(30),
            )
            .unwrap();

        let snap = store.get(&id).unwrap();
        assert!(snap.stale);
        assert_eq!(snap.led_brightness, Some(40));
        assert_eq!(snap.last_polled_at, Some(t(0)));
    }

    #[test]
    fn percentage_hidden_without_capability() {
        let store = StateStore::new(Duration::seconds(1));
        let id = ConnectorId::from("a");
        store.register(
            identity("a", 1),
            Capabilities {
                percentage_limit: false,
            },
            FirmwareGeneration::Current,
        );
        store
            .apply_poll(
                &id,
                ConnectorPatch {
                    percentage_limit: Some(40),
                    ..Default::default()
                },
                t(0),
            )
            .unwrap();
        assert_eq!(store.get(&id).unwrap().percentage_limit, None);
    }

    #[test]
    fn unknown_connector_is_an_error() {
        let store = store_with(&[]);
        let err = store
            .apply_realtime(&"nope".into(), ConnectorPatch::default(), t(0))
            .unwrap_err();
        assert!(matches!(err, CoreError::ConnectorNotFound { .. }));
    }

    #[test]
    fn readers_keep_their_snapshot() {
        let store = store_with(&[("a", 1)]);
        let id = ConnectorId::from("a");
        let before = store.get(&id).unwrap();
        store
            .apply_realtime(
                &id,
                ConnectorPatch {
                    session_state: Some(SessionState::Charging),
                    ..Default::default()
                },
                t(1),
            )
            .unwrap();
        assert_eq!(before.session_state, None);
        assert_eq!(store.get(&id).unwrap().session_state, Some(SessionState::Charging));
    }

    #[test]
    fn realtime_health_tracks_latest_message() {
        let store = store_with(&[]);
        let rx = store.realtime_health();
        store.set_realtime_connected(true);
        store.touch_realtime(t(5));
        store.touch_realtime(t(3));
        assert_eq!(
            *rx.borrow(),
            RealtimeHealth {
                connected: true,
                last_message_at: Some(t(5)),
            }
        );
    }

    #[test]
    fn clear_empties_everything() {
        let store = store_with(&[("a", 1), ("b", 2)]);
        store.clear();
        assert!(store.is_empty());
        assert!(store.snapshots().is_empty());
    }
}
