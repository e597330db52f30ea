// Cloud REST client
//
// Wraps `reqwest::Client` with service-location scoped URL construction,
// bearer authentication and status mapping. Token acquisition and retry
// policy live in `chargebridge-core`; every call here is a single attempt.

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::models::{
    ActionParameter, ConfigurationPatch, MeteringConfiguration, ServiceLocation,
    ServiceLocationListing, SmartDevice,
};
use crate::oauth::preview;
use crate::transport::TransportConfig;

/// Smart-device actions exposed under `.../smartdevices/{uuid}/actions/`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    SetChargingMode,
    StartCharging,
    PauseCharging,
    StopCharging,
    SetPercentageLimit,
    SetBrightness,
    SetAvailable,
    SetUnavailable,
}

impl Action {
    /// Final path segment of the action endpoint.
    pub fn path(self) -> &'static str {
        match self {
            Self::SetChargingMode => "setChargingMode",
            Self::StartCharging => "startCharging",
            Self::PauseCharging => "pauseCharging",
            Self::StopCharging => "stopCharging",
            Self::SetPercentageLimit => "setPercentageLimit",
            Self::SetBrightness => "setBrightness",
            Self::SetAvailable => "setAvailable",
            Self::SetUnavailable => "setUnavailable",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.path())
    }
}

/// Raw HTTP client for the vendor's REST API.
///
/// Scoped to one service location. All methods take the bearer token
/// explicitly so the caller decides when to refresh it.
#[derive(Clone)]
pub struct CloudClient {
    http: reqwest::Client,
    base_url: Url,
    service_location_id: String,
}

impl CloudClient {
    /// Create a client from a `TransportConfig`.
    ///
    /// `base_url` is the API root, e.g. `https://app1pub.smappee.net/dev/v3`.
    pub fn new(
        base_url: Url,
        service_location_id: impl Into<String>,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        Ok(Self::with_client(
            transport.build_client()?,
            base_url,
            service_location_id,
        ))
    }

    /// Create a client around a pre-built `reqwest::Client`.
    pub fn with_client(
        http: reqwest::Client,
        base_url: Url,
        service_location_id: impl Into<String>,
    ) -> Self {
        Self {
            http,
            base_url,
            service_location_id: service_location_id.into(),
        }
    }

    /// A copy of this client scoped to another service location.
    pub fn for_service_location(&self, service_location_id: impl Into<String>) -> Self {
        Self {
            http: self.http.clone(),
            base_url: self.base_url.clone(),
            service_location_id: service_location_id.into(),
        }
    }

    pub fn service_location_id(&self) -> &str {
        &self.service_location_id
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// The underlying HTTP client, for sharing with the OAuth client.
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    // ── URL builders ─────────────────────────────────────────────────

    fn api_url(&self, path: &str) -> Result<Url, Error> {
        let base = self.base_url.as_str().trim_end_matches('/');
        Ok(Url::parse(&format!("{base}/{path}"))?)
    }

    /// `{base}/servicelocation/{slid}/{path}`
    fn location_url(&self, path: &str) -> Result<Url, Error> {
        self.api_url(&format!(
            "servicelocation/{}/{path}",
            self.service_location_id
        ))
    }

    // ── Endpoints ────────────────────────────────────────────────────

    /// All service locations visible to the account.
    pub async fn list_service_locations(&self, token: &str) -> Result<Vec<ServiceLocation>, Error> {
        let url = self.api_url("servicelocation")?;
        let listing: ServiceLocationListing = self.get(url, token).await?;
        Ok(listing.into_vec())
    }

    /// All smart devices of the service location (station scan).
    pub async fn list_smart_devices(&self, token: &str) -> Result<Vec<SmartDevice>, Error> {
        let url = self.location_url("smartdevices")?;
        self.get(url, token).await
    }

    /// One smart device by its id.
    pub async fn get_smart_device(&self, id: &str, token: &str) -> Result<SmartDevice, Error> {
        let url = self.location_url(&format!("smartdevices/{id}"))?;
        self.get(url, token).await
    }

    /// Channel layout of the service location's meters.
    pub async fn get_metering_configuration(
        &self,
        token: &str,
    ) -> Result<MeteringConfiguration, Error> {
        let url = self.location_url("meteringconfiguration")?;
        self.get(url, token).await
    }

    /// Invoke an action on a smart device. `params` may be empty, in which
    /// case `[]` is sent.
    pub async fn post_action(
        &self,
        device_uuid: &str,
        action: Action,
        params: &[ActionParameter],
        token: &str,
    ) -> Result<(), Error> {
        let url = self.location_url(&format!(
            "smartdevices/{device_uuid}/actions/{}",
            action.path()
        ))?;
        self.post(url, params, token).await
    }

    /// Patch configuration properties of a smart device.
    pub async fn patch_configuration(
        &self,
        device_id: &str,
        patch: &ConfigurationPatch,
        token: &str,
    ) -> Result<(), Error> {
        let url = self.location_url(&format!("smartdevices/{device_id}"))?;
        self.patch(url, patch, token).await
    }

    // ── Request helpers ──────────────────────────────────────────────

    async fn get<T: DeserializeOwned>(&self, url: Url, token: &str) -> Result<T, Error> {
        debug!("GET {}", url);

        let resp = self
            .http
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(Error::Transport)?;

        parse_json(resp).await
    }

    async fn post(
        &self,
        url: Url,
        body: &(impl Serialize + Sync + ?Sized),
        token: &str,
    ) -> Result<(), Error> {
        debug!("POST {}", url);

        let resp = self
            .http
            .post(url)
            .bearer_auth(token)
            .json(body)
            .send()
            .await
            .map_err(Error::Transport)?;

        check_status(resp).await.map(drop)
    }

    async fn patch(
        &self,
        url: Url,
        body: &(impl Serialize + Sync),
        token: &str,
    ) -> Result<(), Error> {
        debug!("PATCH {}", url);

        let resp = self
            .http
            .patch(url)
            .bearer_auth(token)
            .json(body)
            .send()
            .await
            .map_err(Error::Transport)?;

        check_status(resp).await.map(drop)
    }
}

/// Map non-success statuses to errors; hand back the successful response.
async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, Error> {
    let status = resp.status();

    if status == reqwest::StatusCode::UNAUTHORIZED {
        return Err(Error::Authentication {
            message: "bearer token rejected".into(),
        });
    }

    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(Error::Http {
            status: status.as_u16(),
            message: preview(&body),
        });
    }

    Ok(resp)
}

async fn parse_json<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, Error> {
    let resp = check_status(resp).await?;
    let body = resp.text().await.map_err(Error::Transport)?;

    serde_json::from_str(&body).map_err(|e| Error::Deserialization {
        message: format!("{e} (body preview: {:?})", preview(&body)),
        body,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn action_paths_match_vendor_names() {
        assert_eq!(Action::SetChargingMode.path(), "setChargingMode");
        assert_eq!(Action::SetUnavailable.to_string(), "setUnavailable");
    }

    #[test]
    fn location_urls_tolerate_trailing_slash() {
        let base = Url::parse("https://example.test/dev/v3/").unwrap();
        let client = CloudClient::with_client(reqwest::Client::new(), base, "1234");
        let url = client
            .location_url("smartdevices/abc/actions/pauseCharging")
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://example.test/dev/v3/servicelocation/1234/smartdevices/abc/actions/pauseCharging"
        );
    }
}
