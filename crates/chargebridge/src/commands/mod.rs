//! Command dispatch: bridges CLI args -> core commands -> output formatting.

pub mod charge;
pub mod config_cmd;
pub mod run;
pub mod status;
pub mod util;

use chargebridge_core::BridgeConfig;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Dispatch a station-bound command to its handler.
pub async fn dispatch(
    cmd: Command,
    config: BridgeConfig,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match cmd {
        Command::Run(args) => run::handle(config, &args, global).await,
        Command::Status(args) => status::handle(config, &args, global).await,
        Command::Config(_) | Command::Completions(_) => Err(CliError::Internal(
            "config and completions are handled before dispatch".into(),
        )),
        charging => charge::handle(config, charging, global).await,
    }
}
