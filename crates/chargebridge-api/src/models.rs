// Wire models for the vendor REST API.
//
// Smart devices describe themselves through two loosely-typed property
// lists. Values are kept as raw JSON here; typed extraction happens in
// `chargebridge-core` so a single bad property never fails a whole fetch.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Well-known property spec names.
pub mod spec {
    pub const CHARGING_STATE: &str = "chargingState";
    pub const PERCENTAGE_LIMIT: &str = "percentageLimit";
    pub const MODE: &str = "mode";
    pub const CHARGING_MODE: &str = "chargingMode";
    pub const OPTIMIZATION_STRATEGY: &str = "optimizationStrategy";
    pub const LED_BRIGHTNESS: &str = "etc.smart.device.type.car.charger.led.config.brightness";
    pub const MAX_CURRENT: &str = "etc.smart.device.type.car.charger.config.max.current";
    pub const MIN_CURRENT: &str = "etc.smart.device.type.car.charger.config.min.current";
    pub const MIN_EXCESS_PCT: &str = "etc.smart.device.type.car.charger.config.min.excesspct";
    pub const CHARGER_NUMBER: &str = "etc.smart.device.type.car.charger.smappee.charger.number";
}

// ── Smart devices ───────────────────────────────────────────────────

/// A smart device as returned by `GET /servicelocation/{id}/smartdevices[/{id}]`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmartDevice {
    /// Numeric or string id, depending on the endpoint.
    #[serde(default)]
    pub id: Value,
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub properties: Option<Vec<DeviceProperty>>,
    #[serde(default)]
    pub configuration_properties: Option<Vec<DeviceProperty>>,
}

impl SmartDevice {
    /// Value of a runtime property, unwrapped from `{ "value": .. }` if needed.
    pub fn property(&self, name: &str) -> Option<&Value> {
        find_property(self.properties.as_deref(), name)
    }

    /// Value of a configuration property, unwrapped from `{ "value": .. }` if needed.
    pub fn configuration(&self, name: &str) -> Option<&Value> {
        find_property(self.configuration_properties.as_deref(), name)
    }

    /// `true` if the device carries the given configuration property at all.
    pub fn has_configuration(&self, name: &str) -> bool {
        self.configuration_properties
            .as_deref()
            .unwrap_or_default()
            .iter()
            .any(|p| p.name() == Some(name))
    }

    /// The id rendered as a string, whatever its JSON type.
    pub fn id_string(&self) -> Option<String> {
        match &self.id {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

fn find_property<'a>(props: Option<&'a [DeviceProperty]>, name: &str) -> Option<&'a Value> {
    props
        .unwrap_or_default()
        .iter()
        .find(|p| p.name() == Some(name))
        .map(DeviceProperty::unwrapped_value)
}

/// One entry of `properties[]` or `configurationProperties[]`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceProperty {
    #[serde(default)]
    pub spec: Option<PropertySpec>,
    #[serde(default)]
    pub value: Value,
}

impl DeviceProperty {
    pub fn name(&self) -> Option<&str> {
        self.spec.as_ref()?.name.as_deref()
    }

    /// The property value; `{ "value": x }` wrappers are peeled off.
    pub fn unwrapped_value(&self) -> &Value {
        match &self.value {
            Value::Object(map) => map.get("value").unwrap_or(&self.value),
            other => other,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PropertySpec {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub species: Option<String>,
}

// ── Service locations ───────────────────────────────────────────────

/// A service location as returned by `GET /servicelocation`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceLocation {
    pub service_location_id: Value,
    #[serde(default)]
    pub service_location_uuid: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub device_serial_number: Option<String>,
}

/// The listing endpoint answers either with a bare array or wrapped.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum ServiceLocationListing {
    Bare(Vec<ServiceLocation>),
    Wrapped {
        #[serde(rename = "serviceLocations", default)]
        service_locations: Vec<ServiceLocation>,
    },
}

impl ServiceLocationListing {
    pub(crate) fn into_vec(self) -> Vec<ServiceLocation> {
        match self {
            Self::Wrapped { service_locations } => service_locations,
            Self::Bare(v) => v,
        }
    }
}

// ── Metering configuration ──────────────────────────────────────────

/// `GET /servicelocation/{id}/meteringconfiguration`, reduced to the
/// charger channels. Each channel points into the arrays of the `power`
/// feed topic.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeteringConfiguration {
    #[serde(default)]
    pub charging_stations: Option<Vec<MeteredStation>>,
}

impl MeteringConfiguration {
    /// Every charger of every station, in listing order.
    pub fn chargers(&self) -> impl Iterator<Item = &MeteredCharger> {
        self.charging_stations
            .as_deref()
            .unwrap_or_default()
            .iter()
            .flat_map(|station| station.chargers.as_deref().unwrap_or_default())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MeteredStation {
    #[serde(default)]
    pub chargers: Option<Vec<MeteredCharger>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeteredCharger {
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub position: Option<Value>,
    #[serde(default)]
    pub serial_number: Option<String>,
    #[serde(default)]
    pub channels: Option<Vec<MeteringChannel>>,
}

impl MeteredCharger {
    /// Indexes into `activePowerData` and `currentData`.
    pub fn power_indexes(&self) -> Vec<usize> {
        self.indexes(|c| c.power_topic_index.as_ref())
    }

    /// Indexes into `importActiveEnergyData`.
    pub fn consumption_indexes(&self) -> Vec<usize> {
        self.indexes(|c| c.consumption_index.as_ref())
    }

    fn indexes(&self, pick: impl Fn(&MeteringChannel) -> Option<&Value>) -> Vec<usize> {
        self.channels
            .as_deref()
            .unwrap_or_default()
            .iter()
            .filter_map(|c| pick(c).and_then(json_int))
            .filter_map(|n| usize::try_from(n).ok())
            .collect()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeteringChannel {
    #[serde(default)]
    pub power_topic_index: Option<Value>,
    #[serde(default)]
    pub consumption_index: Option<Value>,
}

// ── Action parameters ───────────────────────────────────────────────

/// Value type tag the action endpoints expect next to each parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Species {
    String,
    Integer,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterSpec {
    pub name: String,
    pub species: Species,
}

/// One `{ "spec": { "name", "species" }, "value" }` action parameter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionParameter {
    pub spec: ParameterSpec,
    pub value: Value,
}

impl ActionParameter {
    pub fn string(name: &str, value: &str) -> Self {
        Self {
            spec: ParameterSpec {
                name: name.into(),
                species: Species::String,
            },
            value: Value::from(value),
        }
    }

    pub fn integer(name: &str, value: i64) -> Self {
        Self {
            spec: ParameterSpec {
                name: name.into(),
                species: Species::Integer,
            },
            value: Value::from(value),
        }
    }
}

/// Body of the configuration `PATCH` on a smart device.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationPatch {
    pub configuration_properties: Vec<ActionParameter>,
}

// ── Value coercion ──────────────────────────────────────────────────

/// Read an integer from a JSON number or numeric string.
///
/// Floats are rounded; anything else yields `None`.
#[allow(clippy::cast_possible_truncation, clippy::as_conversions)]
pub fn json_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.round() as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
