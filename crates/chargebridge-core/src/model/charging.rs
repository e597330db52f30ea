// ── Charging vocabulary ──
//
// Modes, session states and limits as the domain sees them, plus the
// conversions between amps and the percentage the vendor API speaks.

use serde::{Deserialize, Serialize};

use super::connector::FirmwareGeneration;

/// Default device bounds until the device reports its own.
pub const DEFAULT_MIN_CURRENT: u32 = 6;
pub const DEFAULT_MAX_CURRENT: u32 = 32;

/// Charging strategy of a connector.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum ChargingMode {
    Smart,
    Solar,
    Normal,
    /// Legacy firmware only: NORMAL driven by a percentage.
    NormalPercentage,
}

impl ChargingMode {
    /// Whether a station of the given generation accepts this mode.
    pub fn supported_on(self, firmware: FirmwareGeneration) -> bool {
        match self {
            Self::NormalPercentage => firmware == FirmwareGeneration::Legacy,
            Self::Smart | Self::Solar | Self::Normal => true,
        }
    }

    /// Value of the `mode` parameter of `setChargingMode`.
    pub fn wire_value(self) -> &'static str {
        match self {
            Self::Smart => "SMART",
            Self::Solar => "SOLAR",
            Self::Normal | Self::NormalPercentage => "STANDARD",
        }
    }

    /// Derive the mode from the feed's `optimizationStrategy`.
    pub fn from_strategy(strategy: &str) -> Self {
        if strategy.eq_ignore_ascii_case("EXCESS_ONLY") {
            Self::Solar
        } else if strategy.eq_ignore_ascii_case("SCHEDULES_FIRST_THEN_EXCESS") {
            Self::Smart
        } else {
            Self::Normal
        }
    }
}

/// The charger's reported activity for a connector.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum SessionState {
    Charging,
    Suspended,
    Stopped,
    Paused,
    /// Anything else the vendor reports (`INITIALIZE`, `STARTED`, ...).
    Other(String),
}

impl SessionState {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.eq_ignore_ascii_case("CHARGING") {
            Self::Charging
        } else if raw.eq_ignore_ascii_case("SUSPENDED") {
            Self::Suspended
        } else if raw.eq_ignore_ascii_case("STOPPED") {
            Self::Stopped
        } else if raw.eq_ignore_ascii_case("PAUSED") {
            Self::Paused
        } else {
            Self::Other(raw.to_ascii_uppercase())
        }
    }
}

impl From<String> for SessionState {
    fn from(raw: String) -> Self {
        Self::parse(&raw)
    }
}

impl From<SessionState> for String {
    fn from(state: SessionState) -> Self {
        state.to_string()
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Charging => f.write_str("CHARGING"),
            Self::Suspended => f.write_str("SUSPENDED"),
            Self::Stopped => f.write_str("STOPPED"),
            Self::Paused => f.write_str("PAUSED"),
            Self::Other(s) => f.write_str(s),
        }
    }
}

/// IEC 61851 vehicle connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
pub enum EvccState {
    /// No vehicle.
    A,
    /// Vehicle connected, not charging.
    B,
    /// Charging.
    C,
    /// Error.
    E,
    /// Fault.
    F,
}

impl EvccState {
    /// Parse from an IEC status such as `"C2"`; only the first letter counts.
    pub fn from_iec(raw: &str) -> Option<Self> {
        match raw.trim().chars().next()?.to_ascii_uppercase() {
            'A' => Some(Self::A),
            'B' => Some(Self::B),
            'C' => Some(Self::C),
            'E' => Some(Self::E),
            'F' => Some(Self::F),
            _ => None,
        }
    }
}

/// Availability as shown to consumers. `Unknown` while stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Availability {
    Available,
    Unavailable,
    Unknown,
}

/// Derived activity phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ChargingPhase {
    Idle,
    Charging,
    Paused,
    Suspended,
}

impl From<Option<&SessionState>> for ChargingPhase {
    fn from(state: Option<&SessionState>) -> Self {
        match state {
            Some(SessionState::Charging) => Self::Charging,
            Some(SessionState::Paused) => Self::Paused,
            Some(SessionState::Suspended) => Self::Suspended,
            _ => Self::Idle,
        }
    }
}

/// Availability x phase, computed from a snapshot and never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlState {
    pub availability: Availability,
    pub phase: ChargingPhase,
}

/// The single limit that drives the active mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "unit", content = "value", rename_all = "lowercase")]
pub enum ActiveLimit {
    /// Amps, in NORMAL.
    Current(u32),
    /// Percent of the device range, in NORMAL_PERCENTAGE.
    Percentage(u32),
}

// ── Amps / percentage conversion ────────────────────────────────────

/// Device current range in amps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentBounds {
    pub min: u32,
    pub max: u32,
}

impl Default for CurrentBounds {
    fn default() -> Self {
        Self {
            min: DEFAULT_MIN_CURRENT,
            max: DEFAULT_MAX_CURRENT,
        }
    }
}

impl CurrentBounds {
    pub fn contains(self, amps: u32) -> bool {
        (self.min..=self.max).contains(&amps)
    }

    /// `round((amps - min) * 100 / (max - min))`, clamped to 0..=100.
    /// A degenerate range maps everything to 100.
    pub fn to_percentage(self, amps: u32) -> u32 {
        if self.max <= self.min {
            return 100;
        }
        if amps <= self.min {
            return 0;
        }
        if amps >= self.max {
            return 100;
        }
        let range = u64::from(self.max - self.min);
        let offset = u64::from(amps - self.min);
        let pct = (offset * 200 + range) / (range * 2);
        u32::try_from(pct.min(100)).unwrap_or(100)
    }

    /// `round(min + pct / 100 * (max - min))`, clamped to the range.
    pub fn to_amps(self, percentage: u32) -> u32 {
        if self.max <= self.min {
            return self.min;
        }
        let range = u64::from(self.max - self.min);
        let pct = u64::from(percentage.min(100));
        let offset = (pct * range * 2 + 100) / 200;
        self.min
            .saturating_add(u32::try_from(offset).unwrap_or(u32::MAX))
            .min(self.max)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn percentage_conversion_matches_device_range() {
        let b = CurrentBounds { min: 6, max: 32 };
        assert_eq!(b.to_percentage(6), 0);
        assert_eq!(b.to_percentage(16), 38);
        assert_eq!(b.to_percentage(19), 50);
        assert_eq!(b.to_percentage(32), 100);
        assert_eq!(b.to_percentage(40), 100);
        assert_eq!(b.to_percentage(0), 0);
    }

    #[test]
    fn amps_conversion_matches_device_range() {
        let b = CurrentBounds { min: 6, max: 32 };
        assert_eq!(b.to_amps(0), 6);
        assert_eq!(b.to_amps(38), 16);
        assert_eq!(b.to_amps(50), 19);
        assert_eq!(b.to_amps(100), 32);
        assert_eq!(b.to_amps(250), 32);
    }

    #[test]
    fn degenerate_range() {
        let b = CurrentBounds { min: 16, max: 16 };
        assert_eq!(b.to_percentage(16), 100);
        assert_eq!(b.to_amps(40), 16);
    }

    #[test]
    fn mode_parsing_and_firmware_gating() {
        assert_eq!(ChargingMode::from_str("normal").unwrap(), ChargingMode::Normal);
        assert_eq!(
            ChargingMode::from_str("NORMAL_PERCENTAGE").unwrap(),
            ChargingMode::NormalPercentage
        );
        assert!(!ChargingMode::NormalPercentage.supported_on(FirmwareGeneration::Current));
        assert!(ChargingMode::NormalPercentage.supported_on(FirmwareGeneration::Legacy));
        assert_eq!(ChargingMode::Normal.wire_value(), "STANDARD");
    }

    #[test]
    fn strategy_derivation() {
        assert_eq!(ChargingMode::from_strategy("EXCESS_ONLY"), ChargingMode::Solar);
        assert_eq!(
            ChargingMode::from_strategy("SCHEDULES_FIRST_THEN_EXCESS"),
            ChargingMode::Smart
        );
        assert_eq!(ChargingMode::from_strategy("NONE"), ChargingMode::Normal);
    }

    #[test]
    fn evcc_letter_from_iec_status() {
        assert_eq!(EvccState::from_iec("C2"), Some(EvccState::C));
        assert_eq!(EvccState::from_iec("b1"), Some(EvccState::B));
        assert_eq!(EvccState::from_iec("D"), None);
        assert_eq!(EvccState::from_iec(""), None);
    }

    #[test]
    fn session_state_parsing() {
        assert_eq!(SessionState::parse("charging"), SessionState::Charging);
        assert_eq!(
            SessionState::parse("Initialize"),
            SessionState::Other("INITIALIZE".into())
        );
        assert_eq!(ChargingPhase::from(Some(&SessionState::Paused)), ChargingPhase::Paused);
        assert_eq!(ChargingPhase::from(None), ChargingPhase::Idle);
    }
}
