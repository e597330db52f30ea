// ── Token manager ──
//
// Owns the access/refresh token pair. Readers share a read lock on the
// cached token; renewals are serialized behind `refresh_lock`, and a
// caller that queued behind a renewal re-checks the cache before going
// to the network, so concurrent callers share one refresh.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chargebridge_api::{Credentials, Error as ApiError, OAuthClient, TokenResponse};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::TokenPolicy;
use crate::error::CoreError;

/// A bearer token plus the generation it was issued in. The generation
/// lets a caller that saw a 401 ask for a refresh of *that* token only.
#[derive(Clone)]
pub struct IssuedToken {
    value: SecretString,
    generation: u64,
}

impl IssuedToken {
    pub fn expose(&self) -> &str {
        self.value.expose_secret()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl std::fmt::Debug for IssuedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedToken")
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct TokenState {
    access: Option<SecretString>,
    refresh: Option<SecretString>,
    expires_at: Option<Instant>,
    generation: u64,
    /// Set when the password grant itself was refused. Cleared only by
    /// `update_credentials`.
    reauth_required: Option<String>,
}

struct GrantFailure {
    error: ApiError,
    attempts: u32,
}

impl GrantFailure {
    fn is_invalid_grant(&self) -> bool {
        matches!(self.error, ApiError::InvalidGrant { .. })
    }

    fn into_core(self) -> CoreError {
        if self.error.is_transient() {
            CoreError::TransientNetwork {
                attempts: self.attempts,
                message: self.error.to_string(),
            }
        } else {
            CoreError::from(self.error)
        }
    }
}

pub struct TokenManager {
    oauth: OAuthClient,
    credentials: RwLock<Credentials>,
    policy: TokenPolicy,
    state: RwLock<TokenState>,
    refresh_lock: Mutex<()>,
    grant_requests: AtomicU64,
}

impl TokenManager {
    pub fn new(oauth: OAuthClient, credentials: Credentials, policy: TokenPolicy) -> Self {
        Self {
            oauth,
            credentials: RwLock::new(credentials),
            policy,
            state: RwLock::new(TokenState::default()),
            refresh_lock: Mutex::new(()),
            grant_requests: AtomicU64::new(0),
        }
    }

    /// A token valid for at least the safety margin.
    pub async fn get_valid_token(&self) -> Result<IssuedToken, CoreError> {
        if let Some(token) = self.cached().await? {
            return Ok(token);
        }

        let _renewal = self.refresh_lock.lock().await;
        if let Some(token) = self.cached().await? {
            return Ok(token);
        }
        self.renew().await
    }

    /// Called after the API answered 401 to a token of `generation`.
    /// If another caller already replaced that token, the replacement is
    /// returned without a new grant.
    pub async fn refresh_after_rejection(&self, generation: u64) -> Result<IssuedToken, CoreError> {
        let _renewal = self.refresh_lock.lock().await;
        {
            let state = self.state.read().await;
            if let Some(message) = &state.reauth_required {
                return Err(CoreError::ReauthRequired {
                    message: message.clone(),
                });
            }
            if state.generation != generation {
                if let Some(access) = &state.access {
                    return Ok(IssuedToken {
                        value: access.clone(),
                        generation: state.generation,
                    });
                }
            }
        }
        debug!(generation, "access token rejected by the API, renewing");
        self.state.write().await.access = None;
        self.renew().await
    }

    /// Replace the stored credentials and forget every token, clearing a
    /// pending reauthentication requirement.
    pub async fn update_credentials(&self, credentials: Credentials) {
        let _renewal = self.refresh_lock.lock().await;
        *self.credentials.write().await = credentials;
        let mut state = self.state.write().await;
        let generation = state.generation + 1;
        *state = TokenState {
            generation,
            ..TokenState::default()
        };
        info!("credentials updated");
    }

    pub async fn reauth_required(&self) -> bool {
        self.state.read().await.reauth_required.is_some()
    }

    /// Number of requests sent to the token endpoint so far.
    pub fn grant_requests(&self) -> u64 {
        self.grant_requests.load(Ordering::Relaxed)
    }

    // ── Private helpers ──────────────────────────────────────────────

    async fn cached(&self) -> Result<Option<IssuedToken>, CoreError> {
        let state = self.state.read().await;
        if let Some(message) = &state.reauth_required {
            return Err(CoreError::ReauthRequired {
                message: message.clone(),
            });
        }
        let (Some(access), Some(expires_at)) = (&state.access, state.expires_at) else {
            return Ok(None);
        };
        if Instant::now() + self.policy.safety_margin >= expires_at {
            return Ok(None);
        }
        Ok(Some(IssuedToken {
            value: access.clone(),
            generation: state.generation,
        }))
    }

    /// Refresh grant if a refresh token is held, falling back to the
    /// password grant when the refresh token is refused.
    async fn renew(&self) -> Result<IssuedToken, CoreError> {
        let credentials = self.credentials.read().await.clone();
        let refresh_token = self.state.read().await.refresh.clone();

        let response = match refresh_token {
            Some(refresh_token) => {
                let refreshed = self
                    .grant(|| self.oauth.refresh_grant(&credentials, &refresh_token))
                    .await;
                match refreshed {
                    Ok(response) => response,
                    Err(failure) if failure.is_invalid_grant() => {
                        warn!("refresh token refused, falling back to password grant");
                        self.password_grant(&credentials).await?
                    }
                    Err(failure) => return Err(failure.into_core()),
                }
            }
            None => self.password_grant(&credentials).await?,
        };

        Ok(self.store(response).await)
    }

    async fn password_grant(&self, credentials: &Credentials) -> Result<TokenResponse, CoreError> {
        match self.grant(|| self.oauth.password_grant(credentials)).await {
            Ok(response) => Ok(response),
            Err(failure) if failure.is_invalid_grant() => {
                let message = failure.error.to_string();
                warn!(error = %message, "password grant refused, reauthentication required");
                let mut state = self.state.write().await;
                state.access = None;
                state.refresh = None;
                state.reauth_required = Some(message.clone());
                Err(CoreError::ReauthRequired { message })
            }
            Err(failure) => Err(failure.into_core()),
        }
    }

    /// Run one grant with linear backoff on transient failures.
    async fn grant<F, Fut>(&self, mut request: F) -> Result<TokenResponse, GrantFailure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<TokenResponse, ApiError>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            self.grant_requests.fetch_add(1, Ordering::Relaxed);
            match request().await {
                Ok(response) => return Ok(response),
                Err(error) if error.is_transient() && attempt < max_attempts => {
                    let delay = self.policy.retry_delay.saturating_mul(attempt);
                    warn!(attempt, error = %error, "token request failed, retrying in {delay:?}");
                    tokio::time::sleep(delay).await;
                }
                Err(error) => {
                    return Err(GrantFailure {
                        error,
                        attempts: attempt,
                    });
                }
            }
        }
    }

    async fn store(&self, response: TokenResponse) -> IssuedToken {
        let lifetime = Duration::from_secs(response.expires_in);
        let mut state = self.state.write().await;
        state.access = Some(response.access_token.clone());
        if let Some(refresh) = response.refresh_token {
            state.refresh = Some(refresh);
        }
        state.expires_at = Some(Instant::now() + lifetime);
        state.generation += 1;
        state.reauth_required = None;
        debug!(
            generation = state.generation,
            expires_in = response.expires_in,
            "access token renewed"
        );
        IssuedToken {
            value: response.access_token,
            generation: state.generation,
        }
    }
}
