use thiserror::Error;

/// Top-level error type for the `chargebridge-api` crate.
///
/// Covers every failure mode of the wire layer: OAuth grants, REST
/// transport, vendor HTTP errors, payload decoding, and the MQTT feed.
/// `chargebridge-core` maps these into its caller-facing taxonomy.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// The REST API rejected the bearer token (HTTP 401).
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    /// The token endpoint rejected the grant (bad credentials, revoked
    /// refresh token, unknown client).
    #[error("Token grant rejected (HTTP {status}): {message}")]
    InvalidGrant { status: u16, message: String },

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, timeout, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    // ── Vendor API ──────────────────────────────────────────────────
    /// Non-success HTTP status other than 401.
    #[error("API error (HTTP {status}): {message}")]
    Http { status: u16, message: String },

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },

    // ── Realtime feed ───────────────────────────────────────────────
    /// MQTT connection or client error.
    #[error("MQTT error: {0}")]
    Mqtt(String),
}

impl Error {
    /// Returns `true` if the bearer token was rejected and a token
    /// refresh might resolve it.
    pub fn is_auth_expired(&self) -> bool {
        matches!(self, Self::Authentication { .. })
    }

    /// Returns `true` if this is a transient error worth retrying:
    /// timeouts, connection failures, 5xx and 429 responses.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.is_request()
                    || e.status().is_some_and(|s| s.is_server_error())
            }
            Self::Http { status, .. } => *status >= 500 || *status == 429,
            Self::Mqtt(_) => true,
            _ => false,
        }
    }

    /// The HTTP status attached to this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Authentication { .. } => Some(401),
            Self::InvalidGrant { status, .. } | Self::Http { status, .. } => Some(*status),
            Self::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_and_throttling_are_transient() {
        for status in [500, 502, 503, 429] {
            let err = Error::Http {
                status,
                message: String::new(),
            };
            assert!(err.is_transient(), "HTTP {status} should be transient");
        }
    }

    #[test]
    fn client_errors_are_not_transient() {
        for status in [400, 403, 404, 422] {
            let err = Error::Http {
                status,
                message: String::new(),
            };
            assert!(!err.is_transient(), "HTTP {status} should not be transient");
        }
    }

    #[test]
    fn only_bearer_rejection_counts_as_expired() {
        let expired = Error::Authentication {
            message: "token expired".into(),
        };
        let grant = Error::InvalidGrant {
            status: 400,
            message: "invalid_grant".into(),
        };
        assert!(expired.is_auth_expired());
        assert!(!grant.is_auth_expired());
        assert_eq!(expired.status(), Some(401));
        assert_eq!(grant.status(), Some(400));
    }
}
