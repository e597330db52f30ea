// chargebridge-api: async wire layer for the Smappee EV cloud (REST v3, OAuth2, MQTT)

pub mod client;
pub mod error;
pub mod models;
pub mod oauth;
pub mod realtime;
pub mod transport;

pub use client::{Action, CloudClient};
pub use error::Error;
pub use oauth::{OAuthClient, TokenResponse};
pub use realtime::{FeedMessage, FeedStatus, MqttFeedConfig, RealtimeHandle, ReconnectConfig, TopicKind};
pub use transport::TransportConfig;

use secrecy::SecretString;

/// Production REST base URL.
pub const DEFAULT_BASE_URL: &str = "https://app1pub.smappee.net/dev/v3";

/// Production OAuth2 token endpoint.
pub const DEFAULT_TOKEN_URL: &str = "https://app1pub.smappee.net/dev/v1/oauth2/token";

/// Production MQTT broker (TLS).
pub const DEFAULT_MQTT_HOST: &str = "mqtt.smappee.net";
pub const DEFAULT_MQTT_PORT: u16 = 443;

/// Everything the token endpoint needs for a password or refresh grant.
///
/// The secret halves are held in [`SecretString`] and never printed by
/// `Debug`.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: SecretString,
    pub username: String,
    pub password: SecretString,
}
