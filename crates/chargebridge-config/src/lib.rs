//! Configuration for the chargebridge CLI and daemon.
//!
//! TOML profiles, credential resolution (env + keyring + plaintext),
//! and translation to `chargebridge_core::BridgeConfig`. The binary adds
//! flag-aware overrides on top.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chargebridge_core::{
    BridgeConfig, Capabilities, ConnectorConfig, Credentials, FirmwareGeneration,
    ServiceLocation, StationConfig,
};
use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Overrides the config file location.
pub const CONFIG_PATH_ENV: &str = "CHARGEBRIDGE_CONFIG";
const ENV_PREFIX: &str = "CHARGEBRIDGE_";
const KEYRING_SERVICE: &str = "chargebridge";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("profile '{name}' not found")]
    ProfileNotFound { name: String },

    #[error("no {what} configured for profile '{profile}'")]
    NoCredentials { profile: String, what: &'static str },

    #[error("keyring error: {0}")]
    Keyring(String),

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

impl From<keyring::Error> for ConfigError {
    fn from(err: keyring::Error) -> Self {
        Self::Keyring(err.to_string())
    }
}

// ── TOML config structs ─────────────────────────────────────────────

#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    pub default_profile: Option<String>,

    #[serde(default)]
    pub defaults: Defaults,

    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

impl Config {
    /// The named profile, else the default one.
    pub fn profile<'a>(&'a self, name: Option<&'a str>) -> Result<(&'a str, &'a Profile), ConfigError> {
        let name = name
            .or(self.default_profile.as_deref())
            .unwrap_or("default");
        self.profiles
            .get(name)
            .map(|p| (name, p))
            .ok_or_else(|| ConfigError::ProfileNotFound { name: name.into() })
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default = "default_color")]
    pub color: String,

    /// HTTP request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Poll interval in seconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            color: default_color(),
            timeout: default_timeout(),
            poll_interval: default_poll_interval(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_color() -> String {
    "auto".into()
}
fn default_timeout() -> u64 {
    15
}
fn default_poll_interval() -> u64 {
    30
}
fn default_true() -> bool {
    true
}

/// One account + station.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Profile {
    /// OAuth client id issued by the vendor.
    pub client_id: String,

    /// Plaintext client secret. Prefer the keyring or `client_secret_env`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret_env: Option<String>,

    pub username: Option<String>,

    /// Plaintext password. Prefer the keyring or `password_env`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_env: Option<String>,

    /// Consult the OS keyring. Off for headless hosts without one.
    #[serde(default = "default_true")]
    pub use_keyring: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_location_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_location_uuid: Option<String>,

    /// Station serial number.
    #[serde(default)]
    pub serial: String,

    #[serde(default)]
    pub firmware: FirmwareGeneration,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub led_device_uuid: Option<String>,

    /// Empty means discover from the account's smart devices.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub connectors: Vec<ConnectorEntry>,

    #[serde(default = "default_true")]
    pub realtime: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_interval: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,

    // Endpoint overrides, for staging and tests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mqtt_host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mqtt_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mqtt_tls: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConnectorEntry {
    pub uuid: String,
    pub smart_device_id: String,
    pub number: u32,
    #[serde(default = "default_true")]
    pub percentage_limit: bool,
}

// ── Config file path ────────────────────────────────────────────────

/// `$CHARGEBRIDGE_CONFIG`, else the platform config dir.
pub fn config_path() -> PathBuf {
    if let Some(path) = std::env::var_os(CONFIG_PATH_ENV) {
        return PathBuf::from(path);
    }
    ProjectDirs::from("net", "chargebridge", "chargebridge").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("chargebridge");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Defaults, then `path`, then `CHARGEBRIDGE_*` variables (`__` nests,
/// e.g. `CHARGEBRIDGE_DEFAULTS__OUTPUT`).
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(
            Env::prefixed(ENV_PREFIX)
                .ignore(&["config", "profile", "password", "client_secret", "username"])
                .split("__"),
        );

    Ok(figment.extract()?)
}

// ── Config saving ───────────────────────────────────────────────────

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Credential resolution ───────────────────────────────────────────

/// The two secrets a profile needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretKind {
    Password,
    ClientSecret,
}

impl SecretKind {
    fn keyring_user(self, profile_name: &str) -> String {
        match self {
            Self::Password => format!("{profile_name}/password"),
            Self::ClientSecret => format!("{profile_name}/client-secret"),
        }
    }

    fn global_env(self) -> &'static str {
        match self {
            Self::Password => "CHARGEBRIDGE_PASSWORD",
            Self::ClientSecret => "CHARGEBRIDGE_CLIENT_SECRET",
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Password => "password",
            Self::ClientSecret => "client secret",
        }
    }
}

/// Resolve one secret: the profile's named env var, the global env var,
/// the OS keyring, then plaintext in the profile.
pub fn resolve_secret(
    profile: &Profile,
    profile_name: &str,
    kind: SecretKind,
) -> Result<SecretString, ConfigError> {
    let (env_name, plaintext) = match kind {
        SecretKind::Password => (&profile.password_env, &profile.password),
        SecretKind::ClientSecret => (&profile.client_secret_env, &profile.client_secret),
    };

    if let Some(env_name) = env_name {
        if let Ok(val) = std::env::var(env_name) {
            return Ok(SecretString::from(val));
        }
    }
    if let Ok(val) = std::env::var(kind.global_env()) {
        return Ok(SecretString::from(val));
    }

    if profile.use_keyring {
        match keyring::Entry::new(KEYRING_SERVICE, &kind.keyring_user(profile_name))
            .and_then(|entry| entry.get_password())
        {
            Ok(secret) => return Ok(SecretString::from(secret)),
            Err(e) => debug!(profile = profile_name, error = %e, "no {} in keyring", kind.label()),
        }
    }

    if let Some(secret) = plaintext {
        return Ok(SecretString::from(secret.clone()));
    }

    Err(ConfigError::NoCredentials {
        profile: profile_name.into(),
        what: kind.label(),
    })
}

/// Write a secret to the OS keyring for `profile_name`.
pub fn store_secret(
    profile_name: &str,
    kind: SecretKind,
    secret: &SecretString,
) -> Result<(), ConfigError> {
    let entry = keyring::Entry::new(KEYRING_SERVICE, &kind.keyring_user(profile_name))?;
    entry.set_password(secret.expose_secret())?;
    Ok(())
}

pub fn resolve_credentials(profile: &Profile, profile_name: &str) -> Result<Credentials, ConfigError> {
    let username = profile
        .username
        .clone()
        .or_else(|| std::env::var("CHARGEBRIDGE_USERNAME").ok())
        .ok_or_else(|| ConfigError::NoCredentials {
            profile: profile_name.into(),
            what: "username",
        })?;
    if profile.client_id.is_empty() {
        return Err(ConfigError::NoCredentials {
            profile: profile_name.into(),
            what: "client id",
        });
    }

    Ok(Credentials {
        client_id: profile.client_id.clone(),
        client_secret: resolve_secret(profile, profile_name, SecretKind::ClientSecret)?,
        username,
        password: resolve_secret(profile, profile_name, SecretKind::Password)?,
    })
}

// ── Translation ─────────────────────────────────────────────────────

/// Build a `BridgeConfig` from a profile. No CLI flag overrides.
pub fn profile_to_bridge_config(
    profile: &Profile,
    profile_name: &str,
    defaults: &Defaults,
) -> Result<BridgeConfig, ConfigError> {
    let credentials = resolve_credentials(profile, profile_name)?;

    let station = StationConfig {
        serial: profile.serial.clone(),
        led_device_uuid: profile.led_device_uuid.clone(),
        firmware: profile.firmware,
        connectors: profile
            .connectors
            .iter()
            .map(|c| ConnectorConfig {
                uuid: c.uuid.clone(),
                smart_device_id: c.smart_device_id.clone(),
                number: c.number,
                capabilities: Capabilities {
                    percentage_limit: c.percentage_limit,
                },
            })
            .collect(),
    };

    let mut config = BridgeConfig::new(credentials, station).map_err(|e| ConfigError::Validation {
        field: "endpoints".into(),
        reason: e.to_string(),
    })?;

    if let Some(url) = &profile.api_url {
        config.endpoints.api_base = parse_url("api_url", url)?;
    }
    if let Some(url) = &profile.token_url {
        config.endpoints.token_url = parse_url("token_url", url)?;
    }
    if let Some(host) = &profile.mqtt_host {
        config.endpoints.mqtt_host.clone_from(host);
    }
    if let Some(port) = profile.mqtt_port {
        config.endpoints.mqtt_port = port;
    }
    if let Some(tls) = profile.mqtt_tls {
        config.endpoints.mqtt_tls = tls;
    }

    config.service_location = ServiceLocation {
        id: profile.service_location_id.clone(),
        uuid: profile.service_location_uuid.clone(),
    };
    config.poll_interval =
        Duration::from_secs(profile.poll_interval.unwrap_or(defaults.poll_interval));
    config.transport.timeout = Duration::from_secs(profile.timeout.unwrap_or(defaults.timeout));
    config.realtime.enabled = profile.realtime;

    Ok(config)
}

fn parse_url(field: &str, raw: &str) -> Result<url::Url, ConfigError> {
    raw.parse().map_err(|_| ConfigError::Validation {
        field: field.into(),
        reason: format!("invalid URL: {raw}"),
    })
}
