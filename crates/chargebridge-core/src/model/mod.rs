// ── Domain model ──
//
// Connector identity, the charging vocabulary, metering and the
// immutable snapshot handed to consumers.

pub mod charging;
pub mod connector;
pub mod metering;
pub mod snapshot;

pub use charging::{
    ActiveLimit, Availability, ChargingMode, ChargingPhase, ControlState, CurrentBounds,
    DEFAULT_MAX_CURRENT, DEFAULT_MIN_CURRENT, EvccState, SessionState,
};
pub use connector::{Capabilities, ConnectorId, ConnectorIdentity, FirmwareGeneration};
pub use metering::{Metering, MeteringChannels};
pub use snapshot::{ConnectorSnapshot, StaleStateWarning};
