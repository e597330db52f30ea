//! One-shot charging commands: resolve the connector, execute, print
//! the resulting snapshot.

use chargebridge_core::{
    ActiveLimit, BridgeConfig, ChargingMode, Command as CoreCommand, Controller, CoreError,
};

use super::util::{self, ConnectorView};
use crate::cli::{Command, GlobalOpts, ModeArg};
use crate::error::CliError;
use crate::output;

pub async fn handle(config: BridgeConfig, cmd: Command, global: &GlobalOpts) -> Result<(), CliError> {
    let (connector, command) = to_core(cmd)?;
    let serial = config.station.serial.clone();
    tracing::debug!(connector, command = command.name(), "executing");

    let snapshot = util::with_deadline(
        global,
        Controller::oneshot(config, move |controller| async move {
            let target = controller.connector_by_serial(&serial, connector)?;
            let id = target.id().clone();
            controller.execute(&id, command).await?;
            controller
                .snapshot(&id)
                .ok_or_else(|| CoreError::ConnectorNotFound {
                    identifier: id.to_string(),
                })
        }),
    )
    .await?;

    let view = ConnectorView::from(snapshot);
    let color = output::should_color(global.color);
    let out = output::render_single(
        global.output,
        &view,
        |v| util::detail(v, color),
        |v| v.snapshot.id().to_string(),
    )?;
    output::print_output(&out, global.quiet);
    Ok(())
}

/// Connector number and core command for a charging subcommand.
fn to_core(cmd: Command) -> Result<(u32, CoreCommand), CliError> {
    let pair = match cmd {
        Command::Mode(args) => (args.target.connector, mode_command(args.mode, args.limit)),
        Command::Pause(t) => (t.connector, CoreCommand::Pause),
        Command::Stop(t) => (t.connector, CoreCommand::Stop),
        Command::Start(args) => (args.target.connector, CoreCommand::Start { limit: args.limit }),
        Command::Available(t) => (t.connector, CoreCommand::SetAvailable),
        Command::Unavailable(t) => (t.connector, CoreCommand::SetUnavailable),
        Command::Brightness(args) => (
            args.target.connector,
            CoreCommand::SetBrightness {
                brightness: args.value,
            },
        ),
        Command::MinSurplus(args) => (
            args.target.connector,
            CoreCommand::SetMinSurplus {
                percentage: args.value,
            },
        ),
        Command::CurrentLimit(args) => (
            args.target.connector,
            CoreCommand::SetCurrentLimit { amps: args.amps },
        ),
        Command::PercentageLimit(args) => (
            args.target.connector,
            CoreCommand::SetPercentageLimit {
                percentage: args.value,
            },
        ),
        other => {
            return Err(CliError::Internal(format!(
                "not a charging command: {other:?}"
            )));
        }
    };
    Ok(pair)
}

/// `--limit` is amps in NORMAL and percent in NORMAL_PERCENTAGE.
fn mode_command(mode: ModeArg, limit: Option<u32>) -> CoreCommand {
    let mode = match mode {
        ModeArg::Normal => ChargingMode::Normal,
        ModeArg::Smart => ChargingMode::Smart,
        ModeArg::Solar => ChargingMode::Solar,
        ModeArg::NormalPercentage => ChargingMode::NormalPercentage,
    };
    let limit = limit.map(|value| match mode {
        ChargingMode::NormalPercentage => ActiveLimit::Percentage(value),
        _ => ActiveLimit::Current(value),
    });
    CoreCommand::SetMode { mode, limit }
}
