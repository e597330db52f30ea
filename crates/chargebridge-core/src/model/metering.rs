// ── Connector metering ──
//
// Power, current and energy readings the push feed reports per charger.
// Values live in shared arrays of the `power` topic; the metering
// configuration says which slots belong to which connector.

use serde::Serialize;

/// Latest readings for one connector.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Metering {
    /// Active power per phase, in watts.
    pub power_phases_w: Vec<i64>,
    pub power_total_w: Option<i64>,
    /// Current per phase, in amps.
    pub current_phases_a: Vec<f64>,
    /// Imported energy counter, in kWh.
    pub energy_import_kwh: Option<f64>,
}

/// A connector's slots in the `power` topic arrays.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MeteringChannels {
    /// Slots of `activePowerData` and `currentData`.
    pub power: Vec<usize>,
    /// Slots of `importActiveEnergyData`.
    pub consumption: Vec<usize>,
}

impl MeteringChannels {
    pub fn is_empty(&self) -> bool {
        self.power.is_empty() && self.consumption.is_empty()
    }
}
