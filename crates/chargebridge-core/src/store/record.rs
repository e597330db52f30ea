// ── Mutable per-connector record ──
//
// The store-internal counterpart of `ConnectorSnapshot`. Only the store
// touches it, always under the connector's lock.

use chrono::{DateTime, Duration, Utc};

use super::stamped::{Source, Stamped, supersedes};
use crate::model::{
    Capabilities, ChargingMode, ConnectorIdentity, ConnectorSnapshot, CurrentBounds,
    DEFAULT_MAX_CURRENT, DEFAULT_MIN_CURRENT, EvccState, FirmwareGeneration, Metering,
    SessionState,
};

/// A partial update. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectorPatch {
    pub mode: Option<ChargingMode>,
    pub current_limit_amps: Option<u32>,
    pub percentage_limit: Option<u32>,
    pub session_state: Option<SessionState>,
    pub evcc_state: Option<EvccState>,
    pub available: Option<bool>,
    pub led_brightness: Option<u32>,
    pub min_surplus_pct: Option<u32>,
    pub min_current: Option<u32>,
    pub max_current: Option<u32>,
    pub connection_status: Option<String>,
    pub configuration_errors: Option<Vec<String>>,
    pub metering: Option<Metering>,
}

impl ConnectorPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Which fields of a patch were taken and which lost to fresher data.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    pub accepted: Vec<&'static str>,
    pub rejected: Vec<&'static str>,
}

impl MergeOutcome {
    pub fn was_accepted(&self, field: &str) -> bool {
        self.accepted.contains(&field)
    }

    pub fn was_rejected(&self, field: &str) -> bool {
        self.rejected.contains(&field)
    }
}

#[derive(Debug, Clone)]
pub(crate) struct ConnectorRecord {
    identity: ConnectorIdentity,
    capabilities: Capabilities,
    firmware: FirmwareGeneration,

    mode: Option<Stamped<ChargingMode>>,
    current_limit_amps: Option<Stamped<u32>>,
    percentage_limit: Option<Stamped<u32>>,
    session_state: Option<Stamped<SessionState>>,
    evcc_state: Option<Stamped<EvccState>>,
    available: Option<Stamped<bool>>,
    led_brightness: Option<Stamped<u32>>,
    min_surplus_pct: Option<Stamped<u32>>,
    min_current: Option<Stamped<u32>>,
    max_current: Option<Stamped<u32>>,
    connection_status: Option<Stamped<String>>,
    configuration_errors: Option<Stamped<Vec<String>>>,
    metering: Option<Stamped<Metering>>,

    last_polled_at: Option<DateTime<Utc>>,
    last_realtime_at: Option<DateTime<Utc>>,
    stale: bool,
}

impl ConnectorRecord {
    pub(crate) fn new(
        identity: ConnectorIdentity,
        capabilities: Capabilities,
        firmware: FirmwareGeneration,
    ) -> Self {
        Self {
            identity,
            capabilities,
            firmware,
            mode: None,
            current_limit_amps: None,
            percentage_limit: None,
            session_state: None,
            evcc_state: None,
            available: None,
            led_brightness: None,
            min_surplus_pct: None,
            min_current: None,
            max_current: None,
            connection_status: None,
            configuration_errors: None,
            metering: None,
            last_polled_at: None,
            last_realtime_at: None,
            stale: false,
        }
    }

    pub(crate) fn set_descriptor(
        &mut self,
        identity: ConnectorIdentity,
        capabilities: Capabilities,
        firmware: FirmwareGeneration,
    ) {
        self.identity = identity;
        self.capabilities = capabilities;
        self.firmware = firmware;
    }

    /// Merge every present field of `patch` through [`supersedes`], then
    /// update the per-source bookkeeping.
    pub(crate) fn apply(
        &mut self,
        patch: ConnectorPatch,
        at: DateTime<Utc>,
        source: Source,
        tick: Duration,
    ) -> MergeOutcome {
        let outcome = self.merge(patch, at, source, tick);
        self.confirm(source, at);
        outcome
    }

    /// Field merge only. The connector's freshness and stale flag are
    /// left as they were.
    pub(crate) fn merge(
        &mut self,
        patch: ConnectorPatch,
        at: DateTime<Utc>,
        source: Source,
        tick: Duration,
    ) -> MergeOutcome {
        let mut outcome = MergeOutcome::default();
        let mut ctx = MergeCtx {
            at,
            source,
            tick,
            outcome: &mut outcome,
        };

        ctx.merge("mode", &mut self.mode, patch.mode);
        ctx.merge("current_limit_amps", &mut self.current_limit_amps, patch.current_limit_amps);
        ctx.merge("percentage_limit", &mut self.percentage_limit, patch.percentage_limit);
        ctx.merge("session_state", &mut self.session_state, patch.session_state);
        ctx.merge("evcc_state", &mut self.evcc_state, patch.evcc_state);
        ctx.merge("available", &mut self.available, patch.available);
        ctx.merge("led_brightness", &mut self.led_brightness, patch.led_brightness);
        ctx.merge("min_surplus_pct", &mut self.min_surplus_pct, patch.min_surplus_pct);
        ctx.merge("min_current", &mut self.min_current, patch.min_current);
        ctx.merge("max_current", &mut self.max_current, patch.max_current);
        ctx.merge("connection_status", &mut self.connection_status, patch.connection_status);
        ctx.merge(
            "configuration_errors",
            &mut self.configuration_errors,
            patch.configuration_errors,
        );
        ctx.merge("metering", &mut self.metering, patch.metering);
        outcome
    }

    fn confirm(&mut self, source: Source, at: DateTime<Utc>) {
        match source {
            Source::Poll => {
                self.last_polled_at = self.last_polled_at.max(Some(at));
                self.stale = false;
            }
            Source::Realtime => {
                self.last_realtime_at = self.last_realtime_at.max(Some(at));
            }
            Source::Optimistic => {}
        }
    }

    pub(crate) fn mark_stale(&mut self) -> bool {
        !std::mem::replace(&mut self.stale, true)
    }

    pub(crate) fn snapshot(&self) -> ConnectorSnapshot {
        let bounds = CurrentBounds {
            min: value_of(self.min_current.as_ref()).unwrap_or(DEFAULT_MIN_CURRENT),
            max: value_of(self.max_current.as_ref()).unwrap_or(DEFAULT_MAX_CURRENT),
        };
        let percentage_limit = if self.capabilities.percentage_limit {
            value_of(self.percentage_limit.as_ref())
        } else {
            None
        };

        ConnectorSnapshot {
            identity: self.identity.clone(),
            capabilities: self.capabilities,
            firmware: self.firmware,
            mode: value_of(self.mode.as_ref()),
            current_limit_amps: value_of(self.current_limit_amps.as_ref()),
            percentage_limit,
            session_state: value_of(self.session_state.as_ref()),
            evcc_state: value_of(self.evcc_state.as_ref()),
            available: value_of(self.available.as_ref()),
            led_brightness: value_of(self.led_brightness.as_ref()),
            min_surplus_pct: value_of(self.min_surplus_pct.as_ref()),
            bounds,
            connection_status: value_of(self.connection_status.as_ref()),
            configuration_errors: value_of(self.configuration_errors.as_ref()).unwrap_or_default(),
            metering: value_of(self.metering.as_ref()),
            last_polled_at: self.last_polled_at,
            last_realtime_at: self.last_realtime_at,
            stale: self.stale,
        }
    }
}

fn value_of<T: Clone>(slot: Option<&Stamped<T>>) -> Option<T> {
    slot.map(|s| s.value.clone())
}

struct MergeCtx<'a> {
    at: DateTime<Utc>,
    source: Source,
    tick: Duration,
    outcome: &'a mut MergeOutcome,
}

impl MergeCtx<'_> {
    fn merge<T>(&mut self, name: &'static str, slot: &mut Option<Stamped<T>>, incoming: Option<T>) {
        let Some(value) = incoming else {
            return;
        };
        let take = slot
            .as_ref()
            .is_none_or(|existing| supersedes(self.at, self.source, existing, self.tick));
        if take {
            *slot = Some(Stamped::new(value, self.at, self.source));
            self.outcome.accepted.push(name);
        } else {
            self.outcome.rejected.push(name);
        }
    }
}
