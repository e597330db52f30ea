// OAuth2 token endpoint client
//
// Only the two grants the vendor supports are modeled: resource-owner
// password and refresh. Token lifetime bookkeeping belongs to the caller.

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::Credentials;
use crate::error::Error;
use crate::transport::TransportConfig;

const DEFAULT_EXPIRES_IN: u64 = 3600;

/// A freshly issued token pair.
#[derive(Debug, Clone)]
pub struct TokenResponse {
    pub access_token: SecretString,
    /// Absent when the server does not rotate refresh tokens.
    pub refresh_token: Option<SecretString>,
    /// Lifetime in seconds, as reported (3600 when omitted).
    pub expires_in: u64,
}

#[derive(Deserialize)]
struct RawTokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
}

impl From<RawTokenResponse> for TokenResponse {
    fn from(raw: RawTokenResponse) -> Self {
        Self {
            access_token: raw.access_token.into(),
            refresh_token: raw.refresh_token.map(Into::into),
            expires_in: raw.expires_in.unwrap_or(DEFAULT_EXPIRES_IN),
        }
    }
}

/// Client for the `/oauth2/token` endpoint.
pub struct OAuthClient {
    http: reqwest::Client,
    token_url: Url,
}

impl OAuthClient {
    pub fn new(token_url: Url, transport: &TransportConfig) -> Result<Self, Error> {
        Ok(Self {
            http: transport.build_client()?,
            token_url,
        })
    }

    /// Share an existing `reqwest::Client` (and its connection pool).
    pub fn with_client(http: reqwest::Client, token_url: Url) -> Self {
        Self { http, token_url }
    }

    pub fn token_url(&self) -> &Url {
        &self.token_url
    }

    /// Exchange username and password for a token pair.
    pub async fn password_grant(&self, creds: &Credentials) -> Result<TokenResponse, Error> {
        debug!(username = %creds.username, "requesting password grant");
        self.request(&[
            ("grant_type", "password"),
            ("username", creds.username.as_str()),
            ("password", creds.password.expose_secret()),
            ("client_id", creds.client_id.as_str()),
            ("client_secret", creds.client_secret.expose_secret()),
        ])
        .await
    }

    /// Exchange a refresh token for a new token pair.
    pub async fn refresh_grant(
        &self,
        creds: &Credentials,
        refresh_token: &SecretString,
    ) -> Result<TokenResponse, Error> {
        debug!("requesting refresh grant");
        self.request(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token.expose_secret()),
            ("client_id", creds.client_id.as_str()),
            ("client_secret", creds.client_secret.expose_secret()),
        ])
        .await
    }

    async fn request(&self, form: &[(&str, &str)]) -> Result<TokenResponse, Error> {
        debug!("POST {}", self.token_url);

        let resp = self
            .http
            .post(self.token_url.clone())
            .form(form)
            .send()
            .await
            .map_err(Error::Transport)?;

        let status = resp.status();
        let body = resp.text().await.map_err(Error::Transport)?;

        // The vendor answers bad credentials with either 400 or 401.
        if status == reqwest::StatusCode::BAD_REQUEST || status == reqwest::StatusCode::UNAUTHORIZED
        {
            return Err(Error::InvalidGrant {
                status: status.as_u16(),
                message: preview(&body),
            });
        }

        if !status.is_success() {
            return Err(Error::Http {
                status: status.as_u16(),
                message: preview(&body),
            });
        }

        let raw: RawTokenResponse =
            serde_json::from_str(&body).map_err(|e| Error::Deserialization {
                message: format!("token response: {e}"),
                body: String::new(),
            })?;

        Ok(raw.into())
    }
}

/// First 200 characters of a response body, for error messages.
pub(crate) fn preview(body: &str) -> String {
    body.chars().take(200).collect()
}
