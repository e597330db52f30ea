#![allow(clippy::unwrap_used)]
// Token manager and gateway retry contract against a wiremock token endpoint.

mod common;

use std::sync::Arc;

use serde_json::json;
use url::Url;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use chargebridge_api::{CloudClient, OAuthClient};
use chargebridge_core::{CommandGateway, CoreError, RetryPolicy, TokenManager, TokenPolicy};
use common::*;

fn manager(server: &MockServer) -> Arc<TokenManager> {
    let oauth = OAuthClient::with_client(reqwest::Client::new(), token_url(server));
    Arc::new(TokenManager::new(oauth, credentials(), TokenPolicy::default()))
}

fn gateway(server: &MockServer, tokens: Arc<TokenManager>) -> CommandGateway {
    let base = Url::parse(&format!("{}/dev/v3", server.uri())).unwrap();
    let client = CloudClient::with_client(reqwest::Client::new(), base, LOCATION);
    CommandGateway::new(client, tokens, RetryPolicy::default())
}

// ── Token manager ───────────────────────────────────────────────────

#[tokio::test]
async fn test_concurrent_callers_share_one_grant() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(token_body("at-1"))
                .set_delay(std::time::Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let tokens = manager(&server);
    let calls = (0..8).map(|_| {
        let tokens = Arc::clone(&tokens);
        tokio::spawn(async move { tokens.get_valid_token().await })
    });
    let results = futures_util::future::join_all(calls).await;

    for result in results {
        let token = result.unwrap().unwrap();
        assert_eq!(token.expose(), "at-1");
    }
    assert_eq!(tokens.grant_requests(), 1);
}

#[tokio::test]
async fn test_refused_credentials_are_sticky_until_updated() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({ "error": "invalid_grant" })))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;

    let tokens = manager(&server);
    for _ in 0..3 {
        let err = tokens.get_valid_token().await.unwrap_err();
        assert!(matches!(err, CoreError::ReauthRequired { .. }), "got {err:?}");
    }
    assert!(tokens.reauth_required().await);
    assert_eq!(tokens.grant_requests(), 1);

    mount_password_grant(&server).await;
    tokens.update_credentials(credentials()).await;
    assert!(!tokens.reauth_required().await);
    assert_eq!(tokens.get_valid_token().await.unwrap().expose(), "at-1");
}

// ── Gateway retry contract ──────────────────────────────────────────

#[tokio::test]
async fn test_401_renews_once_and_retries() {
    let server = MockServer::start().await;
    mount_password_grant(&server).await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("at-2")))
        .expect(1)
        .mount(&server)
        .await;

    let device = location_path(&format!("smartdevices/{DEVICE_ID}"));
    Mock::given(method("GET"))
        .and(path(device.as_str()))
        .and(header("authorization", "Bearer at-1"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(device.as_str()))
        .and(header("authorization", "Bearer at-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(charger("NONE", 50)))
        .expect(1)
        .mount(&server)
        .await;

    let tokens = manager(&server);
    let gateway = gateway(&server, Arc::clone(&tokens));
    let fetched = gateway.fetch_device(DEVICE_ID).await.unwrap();

    assert_eq!(fetched.uuid.as_deref(), Some(CONNECTOR));
    assert_eq!(tokens.grant_requests(), 2);
}

#[tokio::test]
async fn test_second_401_is_rejected() {
    let server = MockServer::start().await;
    mount_password_grant(&server).await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("at-2")))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(location_path(&format!("smartdevices/{DEVICE_ID}"))))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&server)
        .await;

    let gateway = gateway(&server, manager(&server));
    let err = gateway.fetch_device(DEVICE_ID).await.unwrap_err();

    assert!(matches!(err, CoreError::Rejected { status: 401, .. }), "got {err:?}");
}

#[tokio::test]
async fn test_other_4xx_is_not_retried() {
    let server = MockServer::start().await;
    mount_password_grant(&server).await;
    Mock::given(method("GET"))
        .and(path(location_path(&format!("smartdevices/{DEVICE_ID}"))))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = gateway(&server, manager(&server));
    let err = gateway.fetch_device(DEVICE_ID).await.unwrap_err();

    assert!(matches!(err, CoreError::Rejected { status: 404, .. }), "got {err:?}");
}

#[tokio::test]
async fn test_transient_failures_exhaust_retries() {
    let server = MockServer::start().await;
    mount_password_grant(&server).await;
    Mock::given(method("GET"))
        .and(path(location_path(&format!("smartdevices/{DEVICE_ID}"))))
        .respond_with(ResponseTemplate::new(502))
        .expect(3)
        .mount(&server)
        .await;

    let gateway = gateway(&server, manager(&server));
    let err = gateway.fetch_device(DEVICE_ID).await.unwrap_err();

    assert!(matches!(err, CoreError::TransientNetwork { attempts: 3, .. }), "got {err:?}");
}
