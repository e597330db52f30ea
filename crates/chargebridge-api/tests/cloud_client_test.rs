#![allow(clippy::unwrap_used)]
// Integration tests for `CloudClient` and `OAuthClient` using wiremock.

use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use url::Url;
use wiremock::matchers::{body_json, body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use chargebridge_api::models::{ActionParameter, ConfigurationPatch, json_int, spec};
use chargebridge_api::{Action, CloudClient, Credentials, Error, OAuthClient};

const TOKEN: &str = "access-abc";

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup() -> (MockServer, CloudClient) {
    let server = MockServer::start().await;
    let base_url = Url::parse(&format!("{}/dev/v3", server.uri())).unwrap();
    let client = CloudClient::with_client(reqwest::Client::new(), base_url, "4242");
    (server, client)
}

fn credentials() -> Credentials {
    Credentials {
        client_id: "client-1".into(),
        client_secret: SecretString::from("s3cret"),
        username: "driver@example.com".into(),
        password: SecretString::from("hunter2"),
    }
}

async fn oauth(server: &MockServer) -> OAuthClient {
    let url = Url::parse(&format!("{}/dev/v1/oauth2/token", server.uri())).unwrap();
    OAuthClient::with_client(reqwest::Client::new(), url)
}

// ── REST ────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_get_smart_device_parses_properties() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/dev/v3/servicelocation/4242/smartdevices/77"))
        .and(header("authorization", "Bearer access-abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 77,
            "uuid": "conn-uuid-1",
            "properties": [
                { "spec": { "name": "chargingState" }, "value": "CHARGING" },
                { "spec": { "name": "percentageLimit" }, "value": 50 }
            ],
            "configurationProperties": [
                { "spec": { "name": spec::MAX_CURRENT }, "value": { "value": 32 } },
                { "spec": { "name": spec::MIN_CURRENT }, "value": { "value": 6 } }
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let device = client.get_smart_device("77", TOKEN).await.unwrap();

    assert_eq!(device.uuid.as_deref(), Some("conn-uuid-1"));
    assert_eq!(device.property(spec::CHARGING_STATE).unwrap(), "CHARGING");
    assert_eq!(json_int(device.configuration(spec::MAX_CURRENT).unwrap()), Some(32));
}

#[tokio::test]
async fn test_post_action_sends_parameter_array() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/dev/v3/servicelocation/4242/smartdevices/conn-uuid-1/actions/setChargingMode"))
        .and(body_json(json!([
            { "spec": { "name": "mode", "species": "String" }, "value": "STANDARD" }
        ])))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    client
        .post_action(
            "conn-uuid-1",
            Action::SetChargingMode,
            &[ActionParameter::string(spec::MODE, "STANDARD")],
            TOKEN,
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_post_action_without_parameters_sends_empty_array() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/dev/v3/servicelocation/4242/smartdevices/conn-uuid-1/actions/pauseCharging"))
        .and(body_json(json!([])))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    client
        .post_action("conn-uuid-1", Action::PauseCharging, &[], TOKEN)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_patch_configuration() {
    let (server, client) = setup().await;

    Mock::given(method("PATCH"))
        .and(path("/dev/v3/servicelocation/4242/smartdevices/77"))
        .and(body_json(json!({
            "configurationProperties": [{
                "spec": { "name": spec::MIN_EXCESS_PCT, "species": "Integer" },
                "value": 25
            }]
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let patch = ConfigurationPatch {
        configuration_properties: vec![ActionParameter::integer(spec::MIN_EXCESS_PCT, 25)],
    };
    client.patch_configuration("77", &patch, TOKEN).await.unwrap();
}

#[tokio::test]
async fn test_list_service_locations_wrapped() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/dev/v3/servicelocation"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "appName": "chargebridge",
            "serviceLocations": [
                { "serviceLocationId": 4242, "serviceLocationUuid": "slu-1", "name": "Home" }
            ]
        })))
        .mount(&server)
        .await;

    let locations = client.list_service_locations(TOKEN).await.unwrap();
    assert_eq!(locations.len(), 1);
    assert_eq!(locations[0].service_location_uuid.as_deref(), Some("slu-1"));
}

#[tokio::test]
async fn test_get_metering_configuration() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/dev/v3/servicelocation/4242/meteringconfiguration"))
        .and(header("authorization", "Bearer access-abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "chargingStations": [{
                "serialNumber": "5010000123",
                "chargers": [{
                    "uuid": "conn-1",
                    "position": 1,
                    "channels": [
                        { "powerTopicIndex": 0, "consumptionIndex": 0 },
                        { "powerTopicIndex": "1", "consumptionIndex": null }
                    ]
                }]
            }]
        })))
        .mount(&server)
        .await;

    let config = client.get_metering_configuration(TOKEN).await.unwrap();
    let chargers: Vec<_> = config.chargers().collect();
    assert_eq!(chargers.len(), 1);
    assert_eq!(chargers[0].uuid.as_deref(), Some("conn-1"));
    assert_eq!(chargers[0].power_indexes(), vec![0, 1]);
    assert_eq!(chargers[0].consumption_indexes(), vec![0]);
}

// ── Error mapping ───────────────────────────────────────────────────

#[tokio::test]
async fn test_401_maps_to_authentication() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/dev/v3/servicelocation/4242/smartdevices"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let err = client.list_smart_devices(TOKEN).await.unwrap_err();
    assert!(err.is_auth_expired(), "expected Authentication, got {err:?}");
}

#[tokio::test]
async fn test_server_error_is_transient() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/dev/v3/servicelocation/4242/smartdevices/u/actions/stopCharging"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let err = client
        .post_action("u", Action::StopCharging, &[], TOKEN)
        .await
        .unwrap_err();

    match &err {
        Error::Http { status, message } => {
            assert_eq!(*status, 503);
            assert_eq!(message, "maintenance");
        }
        other => panic!("expected Http error, got {other:?}"),
    }
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_malformed_body_is_deserialization_error() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/dev/v3/servicelocation/4242/smartdevices/1"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;

    let err = client.get_smart_device("1", TOKEN).await.unwrap_err();
    assert!(matches!(err, Error::Deserialization { .. }), "got {err:?}");
}

// ── OAuth ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_password_grant() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/dev/v1/oauth2/token"))
        .and(body_string_contains("grant_type=password"))
        .and(body_string_contains("client_id=client-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "at-1",
            "refresh_token": "rt-1",
            "expires_in": 7200
        })))
        .expect(1)
        .mount(&server)
        .await;

    let token = oauth(&server).await.password_grant(&credentials()).await.unwrap();

    assert_eq!(token.access_token.expose_secret(), "at-1");
    assert_eq!(token.refresh_token.unwrap().expose_secret(), "rt-1");
    assert_eq!(token.expires_in, 7200);
}

#[tokio::test]
async fn test_refresh_grant_defaults_expiry() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/dev/v1/oauth2/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=rt-old"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "access_token": "at-2" })))
        .expect(1)
        .mount(&server)
        .await;

    let token = oauth(&server)
        .await
        .refresh_grant(&credentials(), &SecretString::from("rt-old"))
        .await
        .unwrap();

    assert_eq!(token.access_token.expose_secret(), "at-2");
    assert!(token.refresh_token.is_none());
    assert_eq!(token.expires_in, 3600);
}

#[tokio::test]
async fn test_rejected_grant_is_invalid_grant() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/dev/v1/oauth2/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({ "error": "invalid_grant" })))
        .mount(&server)
        .await;

    let err = oauth(&server).await.password_grant(&credentials()).await.unwrap_err();
    assert!(matches!(err, Error::InvalidGrant { status: 400, .. }), "got {err:?}");
    assert!(!err.is_transient());
}
