// ── Connector identity and capabilities ──

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable key of a connector: the smart-device UUID of its charging
/// controller. Realtime topics address connectors by this value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectorId(String);

impl ConnectorId {
    pub fn new(uuid: impl Into<String>) -> Self {
        Self(uuid.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConnectorId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for ConnectorId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Everything needed to address one connector on the vendor API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectorIdentity {
    pub id: ConnectorId,
    /// Numeric smart-device id, used by the GET and PATCH endpoints.
    pub smart_device_id: String,
    /// 1-based position on the station.
    pub connector_number: u32,
    /// Serial number of the station this connector belongs to.
    pub station_serial: String,
}

/// Firmware generation of a station. Decides which charging modes the
/// device accepts.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum FirmwareGeneration {
    /// Modes NORMAL, SMART, SOLAR.
    #[default]
    Current,
    /// Additionally accepts NORMAL_PERCENTAGE.
    Legacy,
}

/// Per-connector feature flags. Fields absent on some firmware
/// generations are gated here rather than checked at use sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// Whether `setPercentageLimit` is accepted.
    pub percentage_limit: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            percentage_limit: true,
        }
    }
}
