//! `status`: connect, poll once, print every connector.

use std::time::Duration;

use chargebridge_core::{BridgeConfig, Controller};

use super::util::{self, ConnectorRow, ConnectorView};
use crate::cli::{GlobalOpts, StatusArgs};
use crate::error::CliError;
use crate::output;

pub async fn handle(
    config: BridgeConfig,
    args: &StatusArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let window = Duration::from_secs(args.stale_after);
    let (snapshots, warnings) = util::with_deadline(
        global,
        Controller::oneshot(config, |controller| async move {
            Ok((controller.snapshots(), controller.stale_warnings(window)))
        }),
    )
    .await?;

    let views: Vec<ConnectorView> = snapshots.iter().cloned().map(ConnectorView::from).collect();
    let out = output::render_list(
        global.output,
        &views,
        |v: &ConnectorView| ConnectorRow::from(v),
        |v| v.snapshot.id().to_string(),
    )?;
    output::print_output(&out, global.quiet);

    if !global.quiet {
        for warning in &warnings {
            eprintln!("warning: {warning}");
        }
    }
    Ok(())
}
