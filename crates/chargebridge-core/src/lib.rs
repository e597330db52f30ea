// chargebridge-core: reconciled connector state and serialized command execution
// between chargebridge-api and consumers (CLI, home-automation hosts).

pub mod command;
pub mod config;
pub mod controller;
pub mod error;
pub mod gateway;
pub mod model;
pub mod reconcile;
pub mod store;
pub mod stream;
pub mod token;

// ── Primary re-exports ──────────────────────────────────────────────
pub use command::Command;
pub use config::{
    BridgeConfig, ConnectorConfig, Endpoints, RealtimeSettings, RetryPolicy, ServiceLocation,
    StationConfig, TokenPolicy, DEFAULT_POLL_INTERVAL, MIN_POLL_INTERVAL,
};
pub use controller::{ConnectionState, Controller};
pub use error::CoreError;
pub use gateway::CommandGateway;
pub use reconcile::{PollReconciler, PollReport, RealtimeReconciler};
pub use store::{ConnectorPatch, MergeOutcome, RealtimeHealth, Source, StateStore};
pub use stream::SnapshotStream;
pub use token::{IssuedToken, TokenManager};

pub use chargebridge_api::Credentials;

// Model types at the crate root for ergonomics.
pub use model::{
    ActiveLimit, Availability, Capabilities, ChargingMode, ChargingPhase, ConnectorId,
    ConnectorIdentity, ConnectorSnapshot, ControlState, CurrentBounds, EvccState,
    FirmwareGeneration, Metering, MeteringChannels, SessionState, StaleStateWarning,
};
