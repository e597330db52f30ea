//! CLI configuration: a thin wrapper around `chargebridge_config` that
//! honors the `--config`, `--profile` and `--timeout` flags.

use std::path::PathBuf;
use std::time::Duration;

use chargebridge_core::BridgeConfig;

use crate::cli::GlobalOpts;
use crate::error::CliError;

pub use chargebridge_config::{Config, SecretKind, store_secret};

/// `--config`, else `$CHARGEBRIDGE_CONFIG`, else the platform default.
pub fn config_path(global: &GlobalOpts) -> PathBuf {
    global
        .config
        .clone()
        .unwrap_or_else(chargebridge_config::config_path)
}

/// Layered load; a missing file yields defaults plus environment.
pub fn load(global: &GlobalOpts) -> Result<Config, CliError> {
    Ok(chargebridge_config::load_config_from(&config_path(global))?)
}

/// Resolve the active profile name from CLI flags and config.
pub fn active_profile_name(global: &GlobalOpts, config: &Config) -> String {
    global
        .profile
        .clone()
        .or_else(|| config.default_profile.clone())
        .unwrap_or_else(|| "default".into())
}

pub fn profile_not_found(name: &str, config: &Config) -> CliError {
    let mut available: Vec<_> = config.profiles.keys().cloned().collect();
    available.sort();
    CliError::ProfileNotFound {
        name: name.into(),
        available: if available.is_empty() {
            "(none)".into()
        } else {
            available.join(", ")
        },
    }
}

/// Build the runtime config for the active profile. Flags win over the
/// profile.
pub fn build_bridge_config(global: &GlobalOpts) -> Result<BridgeConfig, CliError> {
    let cfg = load(global)?;
    if cfg.profiles.is_empty() {
        return Err(CliError::NoConfig {
            path: config_path(global).display().to_string(),
        });
    }

    let name = active_profile_name(global, &cfg);
    let profile = cfg
        .profiles
        .get(&name)
        .ok_or_else(|| profile_not_found(&name, &cfg))?;

    let mut bridge = chargebridge_config::profile_to_bridge_config(profile, &name, &cfg.defaults)?;
    if let Some(secs) = global.timeout {
        bridge.transport.timeout = Duration::from_secs(secs);
    }
    Ok(bridge)
}
