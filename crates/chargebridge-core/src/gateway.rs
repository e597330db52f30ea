// ── Command gateway ──
//
// Turns validated commands into vendor calls. Every call goes through
// `authorized`, which owns the retry contract: one token renewal on a
// 401, bounded exponential backoff on transient failures, and an
// immediate failure on any other 4xx.

use std::future::Future;
use std::sync::Arc;

use arc_swap::{ArcSwap, ArcSwapOption};
use chargebridge_api::models::{MeteringConfiguration, ServiceLocation, SmartDevice};
use chargebridge_api::{CloudClient, Error as ApiError};
use tracing::{debug, warn};

use crate::command::{Command, Target, WireCall};
use crate::config::RetryPolicy;
use crate::error::CoreError;
use crate::model::ConnectorSnapshot;
use crate::token::TokenManager;

pub struct CommandGateway {
    client: ArcSwap<CloudClient>,
    tokens: Arc<TokenManager>,
    retry: RetryPolicy,
    led_device: ArcSwapOption<String>,
}

impl CommandGateway {
    pub fn new(client: CloudClient, tokens: Arc<TokenManager>, retry: RetryPolicy) -> Self {
        Self {
            client: ArcSwap::from_pointee(client),
            tokens,
            retry,
            led_device: ArcSwapOption::empty(),
        }
    }

    pub fn tokens(&self) -> &Arc<TokenManager> {
        &self.tokens
    }

    /// Point every later call at another service location.
    pub fn set_service_location(&self, id: &str) {
        let client = self.client.load().for_service_location(id);
        self.client.store(Arc::new(client));
    }

    pub fn service_location_id(&self) -> String {
        self.client.load().service_location_id().to_owned()
    }

    /// UUID of the smart device that accepts `setBrightness`.
    pub fn set_led_device(&self, uuid: Option<String>) {
        self.led_device.store(uuid.map(Arc::new));
    }

    pub fn led_device(&self) -> Option<String> {
        self.led_device.load_full().map(|s| s.as_ref().clone())
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Validate `command` against `snapshot`, then run its plan. Nothing
    /// is sent unless validation and target resolution both pass.
    pub async fn execute(
        &self,
        snapshot: &ConnectorSnapshot,
        command: &Command,
    ) -> Result<(), CoreError> {
        command.validate(snapshot)?;
        let plan = command.plan(snapshot);
        let led_device = self.led_device();
        if led_device.is_none() && plan.iter().any(targets_led_controller) {
            return Err(CoreError::Config {
                message: "no LED controller known for this station".into(),
            });
        }

        let connector_uuid = snapshot.id().as_str();
        let device_id = snapshot.identity.smart_device_id.as_str();
        debug!(connector = %snapshot.id(), command = command.name(), calls = plan.len(), "executing");

        for call in &plan {
            match call {
                WireCall::Action {
                    target,
                    action,
                    params,
                } => {
                    let device = match target {
                        Target::Connector => connector_uuid,
                        Target::LedController => led_device.as_deref().unwrap_or_default(),
                    };
                    self.authorized(action.path(), |client, token| async move {
                        client.post_action(device, *action, params, &token).await
                    })
                    .await?;
                }
                WireCall::Configure(patch) => {
                    self.authorized("patchConfiguration", |client, token| async move {
                        client.patch_configuration(device_id, patch, &token).await
                    })
                    .await?;
                }
            }
        }
        Ok(())
    }

    // ── Reads ────────────────────────────────────────────────────────

    pub async fn fetch_device(&self, smart_device_id: &str) -> Result<SmartDevice, CoreError> {
        self.authorized("getSmartDevice", |client, token| async move {
            client.get_smart_device(smart_device_id, &token).await
        })
        .await
    }

    pub async fn list_devices(&self) -> Result<Vec<SmartDevice>, CoreError> {
        self.authorized("listSmartDevices", |client, token| async move {
            client.list_smart_devices(&token).await
        })
        .await
    }

    pub async fn fetch_metering_configuration(&self) -> Result<MeteringConfiguration, CoreError> {
        self.authorized("getMeteringConfiguration", |client, token| async move {
            client.get_metering_configuration(&token).await
        })
        .await
    }

    pub async fn list_service_locations(&self) -> Result<Vec<ServiceLocation>, CoreError> {
        self.authorized("listServiceLocations", |client, token| async move {
            client.list_service_locations(&token).await
        })
        .await
    }

    // ── Retry contract ───────────────────────────────────────────────

    /// Run `request` with a valid bearer token.
    ///
    /// A 401 triggers exactly one renewal of the rejected token and one
    /// retry; a second 401 surfaces as `Rejected`. Transient failures are
    /// retried per [`RetryPolicy`] and surface as `TransientNetwork`.
    pub async fn authorized<T, F, Fut>(&self, op: &str, request: F) -> Result<T, CoreError>
    where
        F: Fn(Arc<CloudClient>, String) -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut token = self.tokens.get_valid_token().await?;
        let mut renewed = false;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let client = self.client.load_full();
            let error = match request(client, token.expose().to_owned()).await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            if error.is_auth_expired() && !renewed {
                renewed = true;
                attempt -= 1;
                token = self.tokens.refresh_after_rejection(token.generation()).await?;
                continue;
            }

            if !error.is_transient() {
                return Err(CoreError::from(error));
            }
            if attempt >= max_attempts {
                warn!(op, attempts = attempt, error = %error, "giving up");
                return Err(CoreError::TransientNetwork {
                    attempts: attempt,
                    message: error.to_string(),
                });
            }

            let delay = self.retry.delay_for(attempt - 1);
            debug!(op, attempt, error = %error, "transient failure, retrying in {delay:?}");
            tokio::time::sleep(delay).await;
        }
    }
}

fn targets_led_controller(call: &WireCall) -> bool {
    matches!(
        call,
        WireCall::Action {
            target: Target::LedController,
            ..
        }
    )
}
