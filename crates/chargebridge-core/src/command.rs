// ── Command API ──
//
// The closed set of charging commands. Each one validates against the
// connector's current snapshot, expands into one or more vendor calls,
// and describes the optimistic patch applied once those calls succeed.

use chargebridge_api::models::{ActionParameter, ConfigurationPatch, spec};
use chargebridge_api::Action;
use serde::Serialize;

use crate::error::CoreError;
use crate::model::{ActiveLimit, ChargingMode, ConnectorSnapshot, SessionState};
use crate::store::ConnectorPatch;

/// All write operations on a connector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, strum::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    SetMode {
        mode: ChargingMode,
        limit: Option<ActiveLimit>,
    },
    SetCurrentLimit {
        amps: u32,
    },
    SetPercentageLimit {
        percentage: u32,
    },
    Pause,
    Stop,
    /// `limit` in amps; defaults to the current limit, else the device max.
    Start {
        limit: Option<u32>,
    },
    SetAvailable,
    SetUnavailable,
    /// Station-wide: targets the LED controller, not the connector.
    SetBrightness {
        brightness: u32,
    },
    SetMinSurplus {
        percentage: u32,
    },
}

/// Which smart device a vendor call addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Target {
    Connector,
    LedController,
}

/// One REST call of a command's plan.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum WireCall {
    Action {
        target: Target,
        action: Action,
        params: Vec<ActionParameter>,
    },
    Configure(ConfigurationPatch),
}

impl Command {
    pub fn name(&self) -> &'static str {
        self.into()
    }

    /// Whether the optimistic patch applies to every connector of the
    /// station rather than only the addressed one.
    pub fn is_station_wide(&self) -> bool {
        matches!(self, Self::SetBrightness { .. })
    }

    /// Check parameters against the connector's bounds, capabilities and
    /// firmware. Runs before any network call.
    pub fn validate(&self, snapshot: &ConnectorSnapshot) -> Result<(), CoreError> {
        match self {
            Self::SetMode { mode, limit } => validate_mode(*mode, *limit, snapshot),
            Self::SetCurrentLimit { amps } => validate_amps(*amps, snapshot),
            Self::SetPercentageLimit { percentage } => validate_percentage_limit(*percentage, snapshot),
            Self::Start { limit } => limit.map_or(Ok(()), |amps| validate_amps(amps, snapshot)),
            Self::SetBrightness { brightness } => validate_pct("brightness", *brightness),
            Self::SetMinSurplus { percentage } => validate_pct("minimum surplus", *percentage),
            Self::Pause | Self::Stop | Self::SetAvailable | Self::SetUnavailable => Ok(()),
        }
    }

    /// The vendor calls that carry out this command, in order.
    pub(crate) fn plan(&self, snapshot: &ConnectorSnapshot) -> Vec<WireCall> {
        let bounds = snapshot.bounds;
        match self {
            Self::SetMode { mode, limit } => {
                let mut calls = vec![connector_call(
                    Action::SetChargingMode,
                    vec![ActionParameter::string(spec::MODE, mode.wire_value())],
                )];
                let percentage = match limit {
                    Some(ActiveLimit::Current(amps)) => Some(bounds.to_percentage(*amps)),
                    Some(ActiveLimit::Percentage(pct)) => Some(*pct),
                    None => None,
                };
                if let Some(pct) = percentage {
                    calls.push(percentage_call(Action::SetPercentageLimit, pct));
                }
                calls
            }
            Self::SetCurrentLimit { amps } => {
                vec![percentage_call(Action::SetPercentageLimit, bounds.to_percentage(*amps))]
            }
            Self::SetPercentageLimit { percentage } => {
                vec![percentage_call(Action::SetPercentageLimit, *percentage)]
            }
            Self::Pause => vec![connector_call(Action::PauseCharging, Vec::new())],
            Self::Stop => vec![connector_call(Action::StopCharging, Vec::new())],
            Self::Start { limit } => {
                let amps = start_amps(*limit, snapshot);
                vec![percentage_call(Action::StartCharging, bounds.to_percentage(amps))]
            }
            Self::SetAvailable => vec![connector_call(Action::SetAvailable, Vec::new())],
            Self::SetUnavailable => vec![connector_call(Action::SetUnavailable, Vec::new())],
            Self::SetBrightness { brightness } => vec![WireCall::Action {
                target: Target::LedController,
                action: Action::SetBrightness,
                params: vec![ActionParameter::integer(
                    spec::LED_BRIGHTNESS,
                    i64::from(*brightness),
                )],
            }],
            Self::SetMinSurplus { percentage } => vec![WireCall::Configure(ConfigurationPatch {
                configuration_properties: vec![ActionParameter::integer(
                    spec::MIN_EXCESS_PCT,
                    i64::from(*percentage),
                )],
            })],
        }
    }

    /// Local echo applied after every call of the plan succeeded.
    pub fn optimistic_patch(&self, snapshot: &ConnectorSnapshot) -> ConnectorPatch {
        let bounds = snapshot.bounds;
        match self {
            Self::SetMode { mode, limit } => {
                let mut patch = ConnectorPatch {
                    mode: Some(*mode),
                    ..ConnectorPatch::default()
                };
                match limit {
                    Some(ActiveLimit::Current(amps)) => {
                        patch.current_limit_amps = Some(*amps);
                        patch.percentage_limit = Some(bounds.to_percentage(*amps));
                    }
                    Some(ActiveLimit::Percentage(pct)) => {
                        patch.percentage_limit = Some(*pct);
                        patch.current_limit_amps = Some(bounds.to_amps(*pct));
                    }
                    None => {}
                }
                patch
            }
            Self::SetCurrentLimit { amps } => ConnectorPatch {
                current_limit_amps: Some(*amps),
                percentage_limit: Some(bounds.to_percentage(*amps)),
                ..ConnectorPatch::default()
            },
            Self::SetPercentageLimit { percentage } => ConnectorPatch {
                percentage_limit: Some(*percentage),
                current_limit_amps: Some(bounds.to_amps(*percentage)),
                ..ConnectorPatch::default()
            },
            // The charger firmware drops back to NORMAL whenever a session
            // is paused; the echo has to say so too.
            Self::Pause => ConnectorPatch {
                session_state: Some(SessionState::Paused),
                mode: Some(ChargingMode::Normal),
                ..ConnectorPatch::default()
            },
            Self::Stop => ConnectorPatch {
                session_state: Some(SessionState::Stopped),
                ..ConnectorPatch::default()
            },
            Self::Start { limit } => {
                let amps = start_amps(*limit, snapshot);
                ConnectorPatch {
                    current_limit_amps: Some(amps),
                    percentage_limit: Some(bounds.to_percentage(amps)),
                    ..ConnectorPatch::default()
                }
            }
            Self::SetAvailable => ConnectorPatch {
                available: Some(true),
                ..ConnectorPatch::default()
            },
            Self::SetUnavailable => ConnectorPatch {
                available: Some(false),
                ..ConnectorPatch::default()
            },
            Self::SetBrightness { brightness } => ConnectorPatch {
                led_brightness: Some(*brightness),
                ..ConnectorPatch::default()
            },
            Self::SetMinSurplus { percentage } => ConnectorPatch {
                min_surplus_pct: Some(*percentage),
                ..ConnectorPatch::default()
            },
        }
    }
}

// ── Validation ───────────────────────────────────────────────────────

fn validate_mode(
    mode: ChargingMode,
    limit: Option<ActiveLimit>,
    snapshot: &ConnectorSnapshot,
) -> Result<(), CoreError> {
    if !mode.supported_on(snapshot.firmware) {
        return Err(CoreError::validation(format!(
            "mode {mode} is not supported on {} firmware",
            snapshot.firmware
        )));
    }
    match (mode, limit) {
        (_, None) => Ok(()),
        (ChargingMode::Smart | ChargingMode::Solar, Some(_)) => Err(CoreError::validation(format!(
            "mode {mode} manages the charging current itself and takes no limit"
        ))),
        (ChargingMode::Normal, Some(ActiveLimit::Current(amps))) => validate_amps(amps, snapshot),
        (ChargingMode::NormalPercentage, Some(ActiveLimit::Percentage(pct))) => {
            validate_percentage_limit(pct, snapshot)
        }
        (ChargingMode::Normal, Some(ActiveLimit::Percentage(_))) => Err(CoreError::validation(
            "mode NORMAL takes a current limit in amps",
        )),
        (ChargingMode::NormalPercentage, Some(ActiveLimit::Current(_))) => Err(
            CoreError::validation("mode NORMAL_PERCENTAGE takes a percentage limit"),
        ),
    }
}

fn validate_amps(amps: u32, snapshot: &ConnectorSnapshot) -> Result<(), CoreError> {
    let bounds = snapshot.bounds;
    if bounds.contains(amps) {
        Ok(())
    } else {
        Err(CoreError::validation(format!(
            "current limit {amps} A is outside {}..={} A",
            bounds.min, bounds.max
        )))
    }
}

fn validate_percentage_limit(percentage: u32, snapshot: &ConnectorSnapshot) -> Result<(), CoreError> {
    if !snapshot.capabilities.percentage_limit {
        return Err(CoreError::validation(format!(
            "connector {} does not support percentage limits",
            snapshot.id()
        )));
    }
    validate_pct("percentage limit", percentage)
}

fn validate_pct(what: &str, value: u32) -> Result<(), CoreError> {
    if value <= 100 {
        Ok(())
    } else {
        Err(CoreError::validation(format!(
            "{what} {value} is outside 0..=100"
        )))
    }
}

// ── Plan helpers ─────────────────────────────────────────────────────

fn connector_call(action: Action, params: Vec<ActionParameter>) -> WireCall {
    WireCall::Action {
        target: Target::Connector,
        action,
        params,
    }
}

fn percentage_call(action: Action, percentage: u32) -> WireCall {
    connector_call(
        action,
        vec![ActionParameter::integer(
            spec::PERCENTAGE_LIMIT,
            i64::from(percentage),
        )],
    )
}

fn start_amps(limit: Option<u32>, snapshot: &ConnectorSnapshot) -> u32 {
    let bounds = snapshot.bounds;
    limit
        .or(snapshot.current_limit_amps)
        .unwrap_or(bounds.max)
        .clamp(bounds.min, bounds.max.max(bounds.min))
}
