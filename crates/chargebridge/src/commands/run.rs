//! `run`: the long-running reconciliation daemon.
//!
//! Connects, keeps the poll and realtime reconcilers running, and logs
//! connector changes. SIGHUP re-reads the profile credentials and
//! reloads; Ctrl-C or SIGTERM disconnects and exits.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use chargebridge_core::{
    ActiveLimit, Availability, BridgeConfig, ChargingMode, ChargingPhase, ConnectorId,
    ConnectorSnapshot, Controller, EvccState,
};

use crate::cli::{GlobalOpts, RunArgs};
use crate::config;
use crate::error::CliError;

pub async fn handle(
    mut bridge: BridgeConfig,
    args: &RunArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    apply_overrides(&mut bridge, args);

    let controller = Controller::new(bridge)?;
    controller.connect().await?;
    info!(
        connectors = controller.snapshots().len(),
        poll_interval_secs = controller.config().effective_poll_interval().as_secs(),
        realtime = controller.config().realtime.enabled,
        "bridge running"
    );

    let mut snapshots = controller.subscribe();
    let mut state = controller.connection_state();
    let mut health = controller.realtime_health();
    let mut seen = summarize(snapshots.current());
    for (id, summary) in &seen {
        info!(connector = %id, "{summary}");
    }

    let window = Duration::from_secs(args.stale_after);
    let mut stale_check = tokio::time::interval(window.max(Duration::from_secs(10)));
    stale_check.tick().await;

    let mut signals = Signals::install()?;
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("interrupt received, shutting down");
                break;
            }
            () = signals.terminate.recv() => {
                info!("SIGTERM received, shutting down");
                break;
            }
            () = signals.hangup.recv() => reload(&controller, global).await,
            changed = snapshots.changed() => {
                let Some(list) = changed else { break };
                log_changes(&mut seen, &list);
            }
            Ok(()) = state.changed() => {
                let current = *state.borrow_and_update();
                info!(state = %current, "connection state changed");
            }
            Ok(()) = health.changed() => {
                let current = *health.borrow_and_update();
                if current.connected {
                    info!("realtime feed connected");
                } else {
                    warn!("realtime feed down, relying on polling");
                }
            }
            _ = stale_check.tick() => {
                for warning in controller.stale_warnings(window) {
                    warn!(connector = %warning.connector, "{warning}");
                }
            }
        }
    }

    controller.disconnect().await;
    Ok(())
}

fn apply_overrides(bridge: &mut BridgeConfig, args: &RunArgs) {
    if let Some(secs) = args.poll_interval {
        bridge.poll_interval = Duration::from_secs(secs);
    }
    if args.no_realtime {
        bridge.realtime.enabled = false;
    }
}

/// Pick up rotated credentials from the profile, then rebuild every
/// connector from the vendor. Failures keep the daemon alive.
async fn reload(controller: &Controller, global: &GlobalOpts) {
    info!("SIGHUP received, reloading");
    match config::build_bridge_config(global) {
        Ok(fresh) => controller.update_credentials(fresh.credentials).await,
        Err(e) => warn!(error = %e, "config reload failed, keeping current credentials"),
    }
    if let Err(e) = controller.reload().await {
        error!(error = %e, "reload failed; send SIGHUP to retry");
    }
}

// ── Change logging ───────────────────────────────────────────────────

/// The fields worth a log line when they change.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Summary {
    availability: Availability,
    phase: ChargingPhase,
    mode: Option<ChargingMode>,
    limit: Option<ActiveLimit>,
    evcc: Option<EvccState>,
    led: Option<u32>,
    min_surplus: Option<u32>,
}

impl From<&ConnectorSnapshot> for Summary {
    fn from(s: &ConnectorSnapshot) -> Self {
        Self {
            availability: s.availability(),
            phase: s.phase(),
            mode: s.mode,
            limit: s.active_limit(),
            evcc: s.evcc_state,
            led: s.led_brightness,
            min_surplus: s.min_surplus_pct,
        }
    }
}

impl std::fmt::Display for Summary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} / {}", self.availability, self.phase)?;
        if let Some(mode) = self.mode {
            write!(f, ", mode {mode}")?;
        }
        match self.limit {
            Some(ActiveLimit::Current(amps)) => write!(f, " at {amps} A")?,
            Some(ActiveLimit::Percentage(pct)) => write!(f, " at {pct}%")?,
            None => {}
        }
        if let Some(evcc) = self.evcc {
            write!(f, ", vehicle {evcc}")?;
        }
        Ok(())
    }
}

fn summarize(list: &[Arc<ConnectorSnapshot>]) -> HashMap<ConnectorId, Summary> {
    list.iter()
        .map(|s| (s.id().clone(), Summary::from(s.as_ref())))
        .collect()
}

/// Log connectors whose summary moved; returns how many did.
fn log_changes(seen: &mut HashMap<ConnectorId, Summary>, list: &[Arc<ConnectorSnapshot>]) -> usize {
    let mut changed = 0;
    for snapshot in list {
        let summary = Summary::from(snapshot.as_ref());
        if seen.get(snapshot.id()) == Some(&summary) {
            continue;
        }
        changed += 1;
        info!(connector = %snapshot.id(), stale = snapshot.stale, "{summary}");
        seen.insert(snapshot.id().clone(), summary);
    }
    if changed == 0 {
        debug!("snapshot refresh without visible changes");
    }
    changed
}

// ── Signals ──────────────────────────────────────────────────────────

struct Signals {
    hangup: SignalStream,
    terminate: SignalStream,
}

struct SignalStream {
    #[cfg(unix)]
    inner: tokio::signal::unix::Signal,
}

impl Signals {
    #[cfg(unix)]
    fn install() -> Result<Self, CliError> {
        use tokio::signal::unix::{SignalKind, signal};
        Ok(Self {
            hangup: SignalStream {
                inner: signal(SignalKind::hangup())?,
            },
            terminate: SignalStream {
                inner: signal(SignalKind::terminate())?,
            },
        })
    }

    #[cfg(not(unix))]
    #[allow(clippy::unnecessary_wraps)]
    fn install() -> Result<Self, CliError> {
        Ok(Self {
            hangup: SignalStream {},
            terminate: SignalStream {},
        })
    }
}

impl SignalStream {
    async fn recv(&mut self) {
        #[cfg(unix)]
        if self.inner.recv().await.is_some() {
            return;
        }
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chargebridge_core::{
        Capabilities, ConnectorIdentity, FirmwareGeneration, SessionState,
    };

    use super::*;

    fn snapshot(state: SessionState) -> Arc<ConnectorSnapshot> {
        let mut snap = ConnectorSnapshot::empty(
            ConnectorIdentity {
                id: ConnectorId::from("conn-1"),
                smart_device_id: "11".into(),
                connector_number: 1,
                station_serial: "5010000123".into(),
            },
            Capabilities::default(),
            FirmwareGeneration::Current,
        );
        snap.available = Some(true);
        snap.mode = Some(ChargingMode::Solar);
        snap.session_state = Some(state);
        Arc::new(snap)
    }

    #[test]
    fn only_visible_changes_are_logged() {
        let first = vec![snapshot(SessionState::Charging)];
        let mut seen = summarize(&first);
        assert_eq!(log_changes(&mut seen, &first), 0);

        let paused = vec![snapshot(SessionState::Paused)];
        assert_eq!(log_changes(&mut seen, &paused), 1);
        assert_eq!(seen[&ConnectorId::from("conn-1")].phase, ChargingPhase::Paused);
    }

    #[test]
    fn summary_reads_like_a_status_line() {
        let summary = Summary::from(snapshot(SessionState::Charging).as_ref());
        assert_eq!(summary.to_string(), "available / charging, mode SOLAR");
    }

    #[test]
    fn run_flags_override_profile() {
        let mut bridge = BridgeConfig::new(
            chargebridge_core::Credentials {
                client_id: "cid".into(),
                client_secret: "cs".to_owned().into(),
                username: "user".into(),
                password: "pw".to_owned().into(),
            },
            chargebridge_core::StationConfig::default(),
        )
        .unwrap();
        let args = RunArgs {
            poll_interval: Some(45),
            no_realtime: true,
            stale_after: 300,
            log_file: None,
        };
        apply_overrides(&mut bridge, &args);
        assert_eq!(bridge.poll_interval, Duration::from_secs(45));
        assert!(!bridge.realtime.enabled);
    }
}
