// ── Core error types ──
//
// The caller-facing taxonomy. Consumers never see raw HTTP plumbing:
// the `From<chargebridge_api::Error>` impl folds transport failures into
// these variants. Stale state is advisory and lives in the model as
// `StaleStateWarning`, not here.

use thiserror::Error;

use crate::model::ConnectorId;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Caller errors ────────────────────────────────────────────────
    /// Bad parameter. Never retried, and no network call was made.
    #[error("Validation failed: {message}")]
    Validation { message: String },

    #[error("Connector not found: {identifier}")]
    ConnectorNotFound { identifier: String },

    /// Another command for this connector is still in flight.
    #[error("Connector {connector} is busy with another command")]
    Busy { connector: ConnectorId },

    // ── Authentication ───────────────────────────────────────────────
    /// The token endpoint rejected the stored credentials. Sticky until
    /// credentials are updated.
    #[error("Reauthentication required: {message}")]
    ReauthRequired { message: String },

    // ── Remote failures ──────────────────────────────────────────────
    /// Timeouts, connection failures and 5xx responses, after retries.
    #[error("Network error after {attempts} attempt(s): {message}")]
    TransientNetwork { attempts: u32, message: String },

    /// The vendor refused the request (4xx).
    #[error("Request rejected (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("API error: {message}")]
    Api { message: String },

    // ── Lifecycle ────────────────────────────────────────────────────
    #[error("Not connected")]
    Disconnected,

    /// Shutdown or reload interrupted the operation.
    #[error("Operation cancelled")]
    Cancelled,

    // ── Configuration ────────────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub(crate) fn not_found(id: &ConnectorId) -> Self {
        Self::ConnectorNotFound {
            identifier: id.to_string(),
        }
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<chargebridge_api::Error> for CoreError {
    fn from(err: chargebridge_api::Error) -> Self {
        use chargebridge_api::Error as ApiError;

        let transient = err.is_transient();
        match err {
            ApiError::Authentication { message } => Self::Rejected {
                status: 401,
                message,
            },
            ApiError::InvalidGrant { message, .. } => Self::ReauthRequired { message },
            ApiError::Http { status, message } if !transient => Self::Rejected { status, message },
            ApiError::InvalidUrl(e) => Self::Config {
                message: format!("Invalid URL: {e}"),
            },
            ApiError::Deserialization { message, body: _ } => Self::Api {
                message: format!("Unexpected response: {message}"),
            },
            other if transient => Self::TransientNetwork {
                attempts: 1,
                message: other.to_string(),
            },
            other => Self::Api {
                message: other.to_string(),
            },
        }
    }
}
