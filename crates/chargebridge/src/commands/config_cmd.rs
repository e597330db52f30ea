//! Config subcommand handlers.

use secrecy::SecretString;

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts, OutputFormat};
use crate::config::{self, Config, SecretKind};
use crate::error::CliError;
use crate::output;

const REDACTED: &str = "********";

pub fn handle(args: &ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Path => {
            output::print_output(&config::config_path(global).display().to_string(), false);
            Ok(())
        }

        ConfigCommand::Show => {
            let mut cfg = config::load(global)?;
            redact(&mut cfg);
            let rendered = match global.output {
                OutputFormat::Table | OutputFormat::Plain => toml::to_string_pretty(&cfg)?,
                format => output::render_single(format, &cfg, |_| String::new(), |_| String::new())?,
            };
            output::print_output(&rendered, global.quiet);
            Ok(())
        }

        ConfigCommand::SetPassword { client_secret } => {
            let cfg = config::load(global)?;
            let name = config::active_profile_name(global, &cfg);
            if !cfg.profiles.contains_key(&name) {
                return Err(config::profile_not_found(&name, &cfg));
            }

            let (kind, prompt, field) = if client_secret {
                (SecretKind::ClientSecret, "Client secret: ", "client_secret")
            } else {
                (SecretKind::Password, "Password: ", "password")
            };
            let secret = rpassword::prompt_password(prompt).map_err(|e| CliError::Validation {
                field: field.into(),
                reason: format!("prompt failed: {e}"),
            })?;
            if secret.is_empty() {
                return Err(CliError::Validation {
                    field: field.into(),
                    reason: "cannot be empty".into(),
                });
            }

            config::store_secret(&name, kind, &SecretString::from(secret))?;
            if !global.quiet {
                eprintln!("✓ {field} stored in system keyring for profile '{name}'");
            }
            Ok(())
        }
    }
}

/// Mask plaintext secrets before printing.
fn redact(cfg: &mut Config) {
    for profile in cfg.profiles.values_mut() {
        if profile.password.is_some() {
            profile.password = Some(REDACTED.into());
        }
        if profile.client_secret.is_some() {
            profile.client_secret = Some(REDACTED.into());
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chargebridge_config::Profile;

    use super::*;

    #[test]
    fn redact_masks_only_present_secrets() {
        let mut cfg = Config::default();
        cfg.profiles.insert(
            "garage".into(),
            Profile {
                password: Some("hunter2".into()),
                ..Profile::default()
            },
        );
        redact(&mut cfg);

        let profile = &cfg.profiles["garage"];
        assert_eq!(profile.password.as_deref(), Some(REDACTED));
        assert_eq!(profile.client_secret, None);
        assert!(!toml::to_string_pretty(&cfg).unwrap().contains("hunter2"));
    }
}
