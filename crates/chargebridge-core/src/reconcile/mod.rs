// ── Reconcilers ──
//
// The two producers feeding the store: the periodic REST poll and the
// push feed. Both translate vendor payloads into `ConnectorPatch`es and
// leave precedence to the store.

pub mod poll;
pub mod realtime;

pub use poll::{PollReconciler, PollReport, discover_connectors};
pub use realtime::RealtimeReconciler;

use chargebridge_api::models::json_int;
use serde_json::Value;

/// A non-negative integer field.
fn as_u32(value: &Value) -> Option<u32> {
    json_int(value).and_then(|n| u32::try_from(n).ok())
}

/// An integer field constrained to 0..=100.
fn as_pct(value: &Value) -> Option<u32> {
    as_u32(value).filter(|pct| *pct <= 100)
}

fn as_text(value: &Value) -> Option<&str> {
    value.as_str().map(str::trim).filter(|s| !s.is_empty())
}
