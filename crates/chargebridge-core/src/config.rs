// ── Runtime bridge configuration ──
//
// Describes *what* to reconcile and *how* to talk to the vendor.
// Carries credential data and tuning, but never touches disk: the CLI
// builds a `BridgeConfig` from its profile and hands it in.

use std::time::Duration;

use chargebridge_api::{
    Credentials, DEFAULT_BASE_URL, DEFAULT_MQTT_HOST, DEFAULT_MQTT_PORT, DEFAULT_TOKEN_URL,
    ReconnectConfig, TransportConfig,
};
use url::Url;

use crate::error::CoreError;
use crate::model::{Capabilities, ConnectorId, ConnectorIdentity, FirmwareGeneration};

/// Lower bound on the poll interval.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Vendor endpoints. Overridable for tests and staging.
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub api_base: Url,
    pub token_url: Url,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_tls: bool,
}

impl Endpoints {
    pub fn production() -> Result<Self, CoreError> {
        Ok(Self {
            api_base: parse_url(DEFAULT_BASE_URL)?,
            token_url: parse_url(DEFAULT_TOKEN_URL)?,
            mqtt_host: DEFAULT_MQTT_HOST.into(),
            mqtt_port: DEFAULT_MQTT_PORT,
            mqtt_tls: true,
        })
    }
}

fn parse_url(raw: &str) -> Result<Url, CoreError> {
    Url::parse(raw).map_err(|e| CoreError::Config {
        message: format!("invalid URL {raw}: {e}"),
    })
}

/// Service location the station belongs to. A missing id is resolved
/// from the account's single location at connect time.
#[derive(Debug, Clone, Default)]
pub struct ServiceLocation {
    pub id: Option<String>,
    /// Needed for the realtime feed only.
    pub uuid: Option<String>,
}

/// One charging connector of the station.
#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    /// Smart-device UUID of the charging controller.
    pub uuid: String,
    /// Numeric smart-device id.
    pub smart_device_id: String,
    pub number: u32,
    pub capabilities: Capabilities,
}

/// The wallbox.
#[derive(Debug, Clone, Default)]
pub struct StationConfig {
    pub serial: String,
    /// Smart device carrying the LED controller. Discovered by the
    /// station scan when absent.
    pub led_device_uuid: Option<String>,
    pub firmware: FirmwareGeneration,
    /// Empty means discover from the service location's smart devices.
    pub connectors: Vec<ConnectorConfig>,
}

impl StationConfig {
    pub(crate) fn identities(&self) -> Vec<(ConnectorIdentity, Capabilities)> {
        self.connectors
            .iter()
            .map(|c| {
                (
                    ConnectorIdentity {
                        id: ConnectorId::new(c.uuid.clone()),
                        smart_device_id: c.smart_device_id.clone(),
                        connector_number: c.number,
                        station_serial: self.serial.clone(),
                    },
                    c.capabilities,
                )
            })
            .collect()
    }
}

/// Bounded exponential backoff for command and poll requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based): doubling, capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Token lifetime handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenPolicy {
    /// A token is refreshed once it expires within this margin.
    pub safety_margin: Duration,
    /// Attempts per grant on transient token endpoint failures.
    pub max_attempts: u32,
    /// Linear delay step between those attempts.
    pub retry_delay: Duration,
}

impl Default for TokenPolicy {
    fn default() -> Self {
        Self {
            safety_margin: Duration::from_secs(60),
            max_attempts: 3,
            retry_delay: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RealtimeSettings {
    pub enabled: bool,
    pub client_id: String,
    pub keep_alive: Duration,
    pub tracking_interval: Duration,
    pub reconnect: ReconnectConfig,
}

impl Default for RealtimeSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            client_id: format!("chargebridge-{}", uuid::Uuid::new_v4().simple()),
            keep_alive: Duration::from_secs(60),
            tracking_interval: Duration::from_secs(60),
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// Everything the controller needs to run one station.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub endpoints: Endpoints,
    pub credentials: Credentials,
    pub service_location: ServiceLocation,
    pub station: StationConfig,
    /// Clamped to [`MIN_POLL_INTERVAL`] on use.
    pub poll_interval: Duration,
    pub transport: TransportConfig,
    pub retry: RetryPolicy,
    pub token: TokenPolicy,
    pub realtime: RealtimeSettings,
    /// Window within which realtime beats poll regardless of timestamps.
    pub tick: Duration,
    /// Consecutive poll failures before a connector is marked stale.
    pub stale_after_failures: u32,
}

impl BridgeConfig {
    pub fn new(credentials: Credentials, station: StationConfig) -> Result<Self, CoreError> {
        Ok(Self {
            endpoints: Endpoints::production()?,
            credentials,
            service_location: ServiceLocation::default(),
            station,
            poll_interval: DEFAULT_POLL_INTERVAL,
            transport: TransportConfig::default(),
            retry: RetryPolicy::default(),
            token: TokenPolicy::default(),
            realtime: RealtimeSettings::default(),
            tick: Duration::from_secs(1),
            stale_after_failures: 3,
        })
    }

    /// The configured interval, never below the floor.
    pub fn effective_poll_interval(&self) -> Duration {
        self.poll_interval.max(MIN_POLL_INTERVAL)
    }

    pub(crate) fn tick_window(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.tick).unwrap_or_else(|_| chrono::Duration::seconds(1))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use secrecy::SecretString;

    use super::*;

    fn credentials() -> Credentials {
        Credentials {
            client_id: "id".into(),
            client_secret: SecretString::from("secret"),
            username: "user".into(),
            password: SecretString::from("pw"),
        }
    }

    #[test]
    fn poll_interval_has_a_floor() {
        let mut config = BridgeConfig::new(credentials(), StationConfig::default()).unwrap();
        assert_eq!(config.effective_poll_interval(), Duration::from_secs(30));
        config.poll_interval = Duration::from_secs(2);
        assert_eq!(config.effective_poll_interval(), MIN_POLL_INTERVAL);
    }

    #[test]
    fn retry_delay_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_millis(500));
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for(4), Duration::from_secs(5));
        assert_eq!(policy.delay_for(40), Duration::from_secs(5));
    }

    #[test]
    fn identities_carry_station_serial() {
        let station = StationConfig {
            serial: "5010000123".into(),
            connectors: vec![ConnectorConfig {
                uuid: "abc".into(),
                smart_device_id: "7".into(),
                number: 2,
                capabilities: Capabilities::default(),
            }],
            ..Default::default()
        };
        let ids = station.identities();
        assert_eq!(ids[0].0.station_serial, "5010000123");
        assert_eq!(ids[0].0.connector_number, 2);
    }
}
