// Shared wiremock fixtures for the controller and token tests.
#![allow(dead_code)]

use std::time::Duration;

use secrecy::SecretString;
use serde_json::{Value, json};
use url::Url;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use chargebridge_api::models::spec;
use chargebridge_core::{
    BridgeConfig, Capabilities, ConnectorConfig, ConnectorId, Credentials, Endpoints,
    RetryPolicy, ServiceLocation, StationConfig,
};

pub const LOCATION: &str = "4242";
pub const CONNECTOR: &str = "conn-1";
pub const DEVICE_ID: &str = "11";
pub const SERIAL: &str = "5010000123";
pub const TOKEN_PATH: &str = "/dev/v1/oauth2/token";

pub fn connector() -> ConnectorId {
    ConnectorId::from(CONNECTOR)
}

pub fn credentials() -> Credentials {
    Credentials {
        client_id: "client-1".into(),
        client_secret: SecretString::from("s3cret"),
        username: "driver@example.com".into(),
        password: SecretString::from("hunter2"),
    }
}

pub fn token_url(server: &MockServer) -> Url {
    Url::parse(&format!("{}{TOKEN_PATH}", server.uri())).unwrap()
}

pub fn location_path(rest: &str) -> String {
    format!("/dev/v3/servicelocation/{LOCATION}/{rest}")
}

pub fn action_path(device: &str, action: &str) -> String {
    location_path(&format!("smartdevices/{device}/actions/{action}"))
}

/// Single-connector station talking to `server`, realtime off, no
/// transient retries.
pub fn bridge_config(server: &MockServer) -> BridgeConfig {
    let station = StationConfig {
        serial: SERIAL.into(),
        led_device_uuid: Some("led-1".into()),
        connectors: vec![ConnectorConfig {
            uuid: CONNECTOR.into(),
            smart_device_id: DEVICE_ID.into(),
            number: 1,
            capabilities: Capabilities::default(),
        }],
        ..StationConfig::default()
    };
    let mut config = BridgeConfig::new(credentials(), station).unwrap();
    config.endpoints = Endpoints {
        api_base: Url::parse(&format!("{}/dev/v3", server.uri())).unwrap(),
        token_url: token_url(server),
        mqtt_host: "localhost".into(),
        mqtt_port: 1883,
        mqtt_tls: false,
    };
    config.service_location = ServiceLocation {
        id: Some(LOCATION.into()),
        uuid: Some("uuid-4242".into()),
    };
    config.realtime.enabled = false;
    config.retry = RetryPolicy {
        max_attempts: 1,
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(10),
    };
    config
}

pub fn token_body(access: &str) -> Value {
    json!({ "access_token": access, "refresh_token": "rt-1", "expires_in": 3600 })
}

pub async fn mount_password_grant(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_string_contains("grant_type=password"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("at-1")))
        .mount(server)
        .await;
}

/// A charging controller as `GET smartdevices/{id}` returns it.
pub fn charger(strategy: &str, percentage: u32) -> Value {
    json!({
        "id": 11,
        "uuid": CONNECTOR,
        "properties": [
            { "spec": { "name": spec::CHARGING_STATE }, "value": "CHARGING" },
            { "spec": { "name": spec::OPTIMIZATION_STRATEGY }, "value": strategy },
            { "spec": { "name": spec::PERCENTAGE_LIMIT }, "value": percentage }
        ],
        "configurationProperties": [
            { "spec": { "name": spec::MAX_CURRENT }, "value": { "value": 32 } },
            { "spec": { "name": spec::MIN_CURRENT }, "value": { "value": 6 } },
            { "spec": { "name": spec::MIN_EXCESS_PCT }, "value": { "value": 25 } }
        ]
    })
}

pub fn led_controller() -> Value {
    json!({
        "id": 12,
        "uuid": "led-1",
        "configurationProperties": [
            { "spec": { "name": spec::LED_BRIGHTNESS }, "value": { "value": 70 } }
        ]
    })
}

/// Station scan plus device poll answering with `device`.
pub async fn mount_station(server: &MockServer, device: Value, delay: Duration) {
    Mock::given(method("GET"))
        .and(path(location_path("smartdevices")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([led_controller(), device.clone()])))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(location_path(&format!("smartdevices/{DEVICE_ID}"))))
        .respond_with(ResponseTemplate::new(200).set_body_json(device).set_delay(delay))
        .mount(server)
        .await;
}

pub async fn mount_action(server: &MockServer, action: &str, delay: Duration) {
    Mock::given(method("POST"))
        .and(path(action_path(CONNECTOR, action)))
        .respond_with(ResponseTemplate::new(200).set_delay(delay))
        .mount(server)
        .await;
}
