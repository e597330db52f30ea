// ── Connector snapshot ──
//
// The immutable, consumer-facing view of one connector. Built by the
// state store after every merge; callers only ever hold `Arc`s to it.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use super::charging::{
    ActiveLimit, Availability, ChargingMode, ChargingPhase, ControlState, CurrentBounds,
    EvccState, SessionState,
};
use super::connector::{Capabilities, ConnectorId, ConnectorIdentity, FirmwareGeneration};
use super::metering::Metering;

/// Point-in-time copy of a connector's reconciled state.
///
/// Fields the vendor has not reported yet are `None`. Device bounds fall
/// back to the defaults of [`CurrentBounds`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectorSnapshot {
    pub identity: ConnectorIdentity,
    pub capabilities: Capabilities,
    pub firmware: FirmwareGeneration,

    pub mode: Option<ChargingMode>,
    pub current_limit_amps: Option<u32>,
    /// Present only when the connector supports percentage limits.
    pub percentage_limit: Option<u32>,
    pub session_state: Option<SessionState>,
    pub evcc_state: Option<EvccState>,
    pub available: Option<bool>,
    pub led_brightness: Option<u32>,
    pub min_surplus_pct: Option<u32>,
    pub bounds: CurrentBounds,
    /// Cloud link status of the charging controller, as reported.
    pub connection_status: Option<String>,
    pub configuration_errors: Vec<String>,
    /// Readings from the push feed; `None` until the first `power` message.
    pub metering: Option<Metering>,

    pub last_polled_at: Option<DateTime<Utc>>,
    pub last_realtime_at: Option<DateTime<Utc>>,
    pub stale: bool,
}

impl ConnectorSnapshot {
    /// An empty snapshot for a freshly registered connector.
    pub fn empty(
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
            bounds: CurrentBounds::default(),
            connection_status: None,
            configuration_errors: Vec::new(),
            metering: None,
            last_polled_at: None,
            last_realtime_at: None,
            stale: false,
        }
    }

    pub fn id(&self) -> &ConnectorId {
        &self.identity.id
    }

    /// `Unknown` while stale, whatever the last reported flag was.
    pub fn availability(&self) -> Availability {
        if self.stale {
            return Availability::Unknown;
        }
        match self.available {
            Some(true) => Availability::Available,
            Some(false) => Availability::Unavailable,
            None => Availability::Unknown,
        }
    }

    pub fn phase(&self) -> ChargingPhase {
        ChargingPhase::from(self.session_state.as_ref())
    }

    pub fn control_state(&self) -> ControlState {
        ControlState {
            availability: self.availability(),
            phase: self.phase(),
        }
    }

    /// The limit that drives the current mode. SMART and SOLAR manage
    /// the current themselves, so neither stored limit is meaningful.
    pub fn active_limit(&self) -> Option<ActiveLimit> {
        match self.mode? {
            ChargingMode::Normal => self.current_limit_amps.map(ActiveLimit::Current),
            ChargingMode::NormalPercentage => self.percentage_limit.map(ActiveLimit::Percentage),
            ChargingMode::Smart | ChargingMode::Solar => None,
        }
    }

    /// Most recent report from either source.
    pub fn last_seen(&self) -> Option<DateTime<Utc>> {
        self.last_polled_at.max(self.last_realtime_at)
    }

    /// Advisory warning if neither source reported within `window`.
    pub fn staleness(&self, now: DateTime<Utc>, window: Duration) -> Option<StaleStateWarning> {
        let last_seen = self.last_seen();
        let fresh = last_seen.is_some_and(|seen| now - seen <= window);
        if fresh && !self.stale {
            return None;
        }
        Some(StaleStateWarning {
            connector: self.identity.id.clone(),
            last_seen,
            window,
        })
    }
}

/// Not an error: neither poll nor realtime confirmed this connector's
/// state within the expected window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StaleStateWarning {
    pub connector: ConnectorId,
    pub last_seen: Option<DateTime<Utc>>,
    #[serde(serialize_with = "serialize_window")]
    pub window: Duration,
}

fn serialize_window<S: serde::Serializer>(window: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_i64(window.num_seconds())
}

impl std::fmt::Display for StaleStateWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.last_seen {
            Some(seen) => write!(
                f,
                "connector {} not confirmed since {} (window {}s)",
                self.connector,
                seen.to_rfc3339(),
                self.window.num_seconds()
            ),
            None => write!(f, "connector {} has never reported", self.connector),
        }
    }
}
