//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with help
//! text and a process exit code.

use miette::Diagnostic;
use thiserror::Error;

use chargebridge_config::ConfigError;
use chargebridge_core::CoreError;

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const BUSY: i32 = 6;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not reach the Smappee cloud after {attempts} attempt(s)")]
    #[diagnostic(
        code(chargebridge::connection_failed),
        help("{message}\nCheck network access, or raise --timeout.")
    )]
    ConnectionFailed { attempts: u32, message: String },

    #[error("Not connected to the station")]
    #[diagnostic(code(chargebridge::disconnected))]
    Disconnected,

    // ── Authentication ───────────────────────────────────────────────
    #[error("Authentication failed: {message}")]
    #[diagnostic(
        code(chargebridge::auth_failed),
        help(
            "Verify the account credentials and OAuth client.\n\
             Run: chargebridge config set-password"
        )
    )]
    AuthFailed { message: String },

    #[error("No {what} configured for profile '{profile}'")]
    #[diagnostic(
        code(chargebridge::no_credentials),
        help(
            "Store it with: chargebridge config set-password --profile {profile}\n\
             Or set CHARGEBRIDGE_PASSWORD / CHARGEBRIDGE_CLIENT_SECRET."
        )
    )]
    NoCredentials { profile: String, what: String },

    // ── Connectors ───────────────────────────────────────────────────
    #[error("Connector '{identifier}' not found")]
    #[diagnostic(
        code(chargebridge::not_found),
        help("Run: chargebridge status to see the connectors of this station")
    )]
    NotFound { identifier: String },

    #[error("Connector {connector} is busy with another command")]
    #[diagnostic(
        code(chargebridge::busy),
        help("Wait for the running command to finish and try again.")
    )]
    Busy { connector: String },

    // ── Remote ───────────────────────────────────────────────────────
    #[error("Request rejected (HTTP {status}): {message}")]
    #[diagnostic(code(chargebridge::rejected))]
    Rejected { status: u16, message: String },

    #[error("API error: {message}")]
    #[diagnostic(code(chargebridge::api_error))]
    ApiError { message: String },

    #[error("Operation cancelled")]
    #[diagnostic(code(chargebridge::cancelled))]
    Cancelled,

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(chargebridge::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(chargebridge::profile_not_found),
        help("Available profiles: {available}")
    )]
    ProfileNotFound { name: String, available: String },

    #[error("No station configured")]
    #[diagnostic(
        code(chargebridge::no_config),
        help(
            "Create a profile in the config file.\n\
             Expected at: {path}"
        )
    )]
    NoConfig { path: String },

    #[error("Invalid configuration: {message}")]
    #[diagnostic(code(chargebridge::config))]
    InvalidConfig { message: String },

    #[error(transparent)]
    #[diagnostic(code(chargebridge::config))]
    Config(Box<ConfigError>),

    // ── Timeout ──────────────────────────────────────────────────────
    #[error("Command did not finish within {seconds}s")]
    #[diagnostic(
        code(chargebridge::timeout),
        help("Raise --deadline or check the station's cloud connection.")
    )]
    Timeout { seconds: u64 },

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Failed to render JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to render YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Failed to render TOML: {0}")]
    Toml(#[from] toml::ser::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } | Self::Disconnected => exit_code::CONNECTION,
            Self::AuthFailed { .. } | Self::NoCredentials { .. } => exit_code::AUTH,
            Self::NotFound { .. } | Self::ProfileNotFound { .. } => exit_code::NOT_FOUND,
            Self::Busy { .. } => exit_code::BUSY,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::Validation { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation { message } => Self::Validation {
                field: "input".into(),
                reason: message,
            },
            CoreError::ConnectorNotFound { identifier } => Self::NotFound { identifier },
            CoreError::Busy { connector } => Self::Busy {
                connector: connector.to_string(),
            },
            CoreError::ReauthRequired { message } => Self::AuthFailed { message },
            CoreError::Rejected {
                status: 401 | 403,
                message,
            } => Self::AuthFailed { message },
            CoreError::Rejected { status, message } => Self::Rejected { status, message },
            CoreError::TransientNetwork { attempts, message } => {
                Self::ConnectionFailed { attempts, message }
            }
            CoreError::Api { message } => Self::ApiError { message },
            CoreError::Disconnected => Self::Disconnected,
            CoreError::Cancelled => Self::Cancelled,
            CoreError::Config { message } => Self::InvalidConfig { message },
            CoreError::Internal(message) => Self::Internal(message),
        }
    }
}

// ── ConfigError → CliError mapping ───────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::NoCredentials { profile, what } => Self::NoCredentials {
                profile,
                what: what.into(),
            },
            ConfigError::Validation { field, reason } => Self::Validation { field, reason },
            ConfigError::ProfileNotFound { name } => Self::ProfileNotFound {
                name,
                available: "(none)".into(),
            },
            other => Self::Config(Box::new(other)),
        }
    }
}
