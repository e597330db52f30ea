// Shared transport configuration for building reqwest::Client instances.
//
// The REST client and the OAuth client share timeouts and the user agent
// through this module, so both talk to the vendor cloud the same way.

use std::time::Duration;

use crate::error::Error;

const USER_AGENT: &str = concat!("chargebridge/", env!("CARGO_PKG_VERSION"));

/// Shared transport configuration for building HTTP clients.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Upper bound on establishing the TCP/TLS connection.
    pub connect_timeout: Duration,
    /// Upper bound on the whole request, body included.
    pub timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            timeout: Duration::from_secs(15),
        }
    }
}

impl TransportConfig {
    /// Build a `reqwest::Client` from this config.
    pub fn build_client(&self) -> Result<reqwest::Client, Error> {
        reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .timeout(self.timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(Error::Transport)
    }
}
