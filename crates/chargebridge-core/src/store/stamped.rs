// ── Per-field provenance ──
//
// Every stored field remembers where its value came from and when.
// `supersedes` is the single merge rule all three producers go through.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

/// Producer of a field value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Source {
    /// Full fetch from the REST API. Stamped with the fetch start time.
    Poll,
    /// Push feed message. Stamped with the receipt time.
    Realtime,
    /// Local echo of a confirmed command. Stamped with the confirmation time.
    Optimistic,
}

/// A value together with its source and timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stamped<T> {
    pub value: T,
    pub at: DateTime<Utc>,
    pub source: Source,
}

impl<T> Stamped<T> {
    pub fn new(value: T, at: DateTime<Utc>, source: Source) -> Self {
        Self { value, at, source }
    }
}

/// Whether an update stamped `(at, source)` replaces `existing`.
///
/// Outside the `tick` window the newer timestamp wins. Inside it,
/// realtime beats poll in both directions; any other pairing falls
/// back to last-writer-wins on the timestamp, ties going to the
/// incoming value.
pub fn supersedes<T>(at: DateTime<Utc>, source: Source, existing: &Stamped<T>, tick: Duration) -> bool {
    if at > existing.at + tick {
        return true;
    }
    if at + tick < existing.at {
        return false;
    }
    match (source, existing.source) {
        (Source::Poll, Source::Realtime) => false,
        (Source::Realtime, Source::Poll) => true,
        _ => at >= existing.at,
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn t(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_700_000_000_000 + ms)
            .single()
            .unwrap_or_default()
    }

    fn tick() -> Duration {
        Duration::seconds(1)
    }

    #[test]
    fn newer_outside_window_always_wins() {
        let existing = Stamped::new(1, t(0), Source::Realtime);
        assert!(supersedes(t(1_500), Source::Poll, &existing, tick()));
        assert!(!supersedes(t(-1_500), Source::Realtime, &existing, tick()));
    }

    #[test]
    fn realtime_beats_poll_within_tick() {
        let poll = Stamped::new(1, t(0), Source::Poll);
        assert!(supersedes(t(-400), Source::Realtime, &poll, tick()));

        let realtime = Stamped::new(1, t(0), Source::Realtime);
        assert!(!supersedes(t(400), Source::Poll, &realtime, tick()));
    }

    #[test]
    fn poll_older_than_optimistic_is_discarded() {
        let optimistic = Stamped::new(1, t(0), Source::Optimistic);
        assert!(!supersedes(t(-1), Source::Poll, &optimistic, tick()));
        assert!(!supersedes(t(-3_000), Source::Poll, &optimistic, tick()));
        assert!(supersedes(t(0), Source::Poll, &optimistic, tick()));
    }

    #[test]
    fn realtime_after_optimistic_wins() {
        let optimistic = Stamped::new(1, t(0), Source::Optimistic);
        assert!(supersedes(t(1), Source::Realtime, &optimistic, tick()));
        assert!(!supersedes(t(-1), Source::Realtime, &optimistic, tick()));
    }
}
