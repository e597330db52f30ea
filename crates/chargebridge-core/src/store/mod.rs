// ── Reconciled state store ──
//
// Per-field merge of poll, realtime and optimistic updates, published
// as immutable snapshots.

mod record;
mod stamped;
mod state_store;

pub use record::{ConnectorPatch, MergeOutcome};
pub use stamped::{Source, Stamped, supersedes};
pub use state_store::{RealtimeHealth, StateStore};
