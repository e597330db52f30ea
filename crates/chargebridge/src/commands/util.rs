//! Shared helpers for command handlers.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tabled::Tabled;

use chargebridge_core::{
    ActiveLimit, Availability, ChargingPhase, ConnectorSnapshot, CoreError,
};

use crate::cli::GlobalOpts;
use crate::error::CliError;
use crate::output;

/// Run a one-shot operation under the `--deadline` budget.
pub async fn with_deadline<T>(
    global: &GlobalOpts,
    fut: impl Future<Output = Result<T, CoreError>>,
) -> Result<T, CliError> {
    match tokio::time::timeout(Duration::from_secs(global.deadline), fut).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(CliError::Timeout {
            seconds: global.deadline,
        }),
    }
}

// ── Snapshot views ───────────────────────────────────────────────────

/// A snapshot plus its derived fields, for structured output.
#[derive(Debug, Serialize)]
pub struct ConnectorView {
    #[serde(flatten)]
    pub snapshot: Arc<ConnectorSnapshot>,
    pub availability: Availability,
    pub phase: ChargingPhase,
    pub active_limit: Option<ActiveLimit>,
}

impl From<Arc<ConnectorSnapshot>> for ConnectorView {
    fn from(snapshot: Arc<ConnectorSnapshot>) -> Self {
        Self {
            availability: snapshot.availability(),
            phase: snapshot.phase(),
            active_limit: snapshot.active_limit(),
            snapshot,
        }
    }
}

#[derive(Tabled)]
pub struct ConnectorRow {
    #[tabled(rename = "#")]
    pub number: u32,
    #[tabled(rename = "Connector")]
    pub id: String,
    #[tabled(rename = "Availability")]
    pub availability: String,
    #[tabled(rename = "Phase")]
    pub phase: String,
    #[tabled(rename = "Mode")]
    pub mode: String,
    #[tabled(rename = "Limit")]
    pub limit: String,
    #[tabled(rename = "EVCC")]
    pub evcc: String,
    #[tabled(rename = "LED")]
    pub led: String,
    #[tabled(rename = "Surplus")]
    pub surplus: String,
    #[tabled(rename = "Last Seen")]
    pub last_seen: String,
}

impl From<&ConnectorView> for ConnectorRow {
    fn from(v: &ConnectorView) -> Self {
        let s = &v.snapshot;
        Self {
            number: s.identity.connector_number,
            id: s.id().to_string(),
            availability: v.availability.to_string(),
            phase: v.phase.to_string(),
            mode: or_dash(s.mode),
            limit: limit_text(v.active_limit),
            evcc: or_dash(s.evcc_state),
            led: s.led_brightness.map_or_else(|| "-".into(), |b| format!("{b}%")),
            surplus: s.min_surplus_pct.map_or_else(|| "-".into(), |p| format!("{p}%")),
            last_seen: when(s.last_seen()),
        }
    }
}

/// Key/value view of one connector.
pub fn detail(v: &ConnectorView, color: bool) -> String {
    let s = &v.snapshot;
    let mut lines = vec![
        output::field("Connector", s.id().as_str(), color),
        output::field(
            "Station",
            &format!("{} #{}", s.identity.station_serial, s.identity.connector_number),
            color,
        ),
        output::field(
            "Availability",
            &output::paint_state(&v.availability.to_string(), color),
            color,
        ),
        output::field("Phase", &output::paint_state(&v.phase.to_string(), color), color),
        output::field("Mode", &or_dash(s.mode), color),
        output::field("Limit", &limit_text(v.active_limit), color),
        output::field(
            "Current",
            &s.current_limit_amps
                .map_or_else(|| "-".into(), |a| format!("{a} A")),
            color,
        ),
        output::field(
            "Bounds",
            &format!("{}-{} A", s.bounds.min, s.bounds.max),
            color,
        ),
        output::field("Session", &or_dash(s.session_state.as_ref()), color),
        output::field("EVCC", &or_dash(s.evcc_state), color),
    ];
    if let Some(b) = s.led_brightness {
        lines.push(output::field("LED", &format!("{b}%"), color));
    }
    if let Some(p) = s.min_surplus_pct {
        lines.push(output::field("Min surplus", &format!("{p}%"), color));
    }
    if let Some(status) = &s.connection_status {
        lines.push(output::field("Cloud link", status, color));
    }
    if let Some(watts) = s.metering.as_ref().and_then(|m| m.power_total_w) {
        lines.push(output::field("Power", &format!("{watts} W"), color));
    }
    if !s.configuration_errors.is_empty() {
        lines.push(output::field("Config errors", &s.configuration_errors.join(", "), color));
    }
    lines.push(output::field("Last seen", &when(s.last_seen()), color));
    if s.stale {
        lines.push(output::field("State", &output::paint_state("stale", color), color));
    }
    lines.join("\n")
}

pub fn or_dash<T: std::fmt::Display>(value: Option<T>) -> String {
    value.map_or_else(|| "-".into(), |v| v.to_string())
}

fn limit_text(limit: Option<ActiveLimit>) -> String {
    match limit {
        Some(ActiveLimit::Current(amps)) => format!("{amps} A"),
        Some(ActiveLimit::Percentage(pct)) => format!("{pct}%"),
        None => "-".into(),
    }
}

fn when(at: Option<DateTime<Utc>>) -> String {
    at.map_or_else(|| "never".into(), |t| t.format("%Y-%m-%d %H:%M:%S").to_string())
}
