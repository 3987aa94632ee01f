//! Clock abstraction and release-ID generation (spec §4.6).

use chrono::{DateTime, Datelike, Timelike, Utc};

/// Injectable source of the current time, so release creation is
/// deterministic under test (spec §4.4, §8).
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock backed by the system wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Test clock returning a fixed instant, optionally advancing on each call
/// so sequential releases in a single test get distinct, ordered IDs.
#[derive(Debug, Clone)]
pub struct FixedClock {
    current: std::sync::Arc<std::sync::Mutex<DateTime<Utc>>>,
    step: chrono::Duration,
}

impl FixedClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { current: std::sync::Arc::new(std::sync::Mutex::new(start)), step: chrono::Duration::zero() }
    }

    /// A fixed clock that advances by `step` on every call to `now()`.
    pub fn advancing(start: DateTime<Utc>, step: chrono::Duration) -> Self {
        Self { current: std::sync::Arc::new(std::sync::Mutex::new(start)), step }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        let mut guard = self.current.lock().expect("fixed clock mutex poisoned");
        let value = *guard;
        *guard += self.step;
        value
    }
}

/// Format a timestamp as `rel-YYYYMMDD-HHMMSSmmm` (spec §4.6). Lexicographic
/// ordering of the resulting string matches chronological ordering because
/// every field is fixed-width and zero-padded.
pub fn release_id(now: DateTime<Utc>) -> String {
    format!(
        "rel-{:04}{:02}{:02}-{:02}{:02}{:02}{:03}",
        now.year(),
        now.month(),
        now.day(),
        now.hour(),
        now.minute(),
        now.second(),
        now.timestamp_subsec_millis(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_id_format_and_width() {
        let ts = DateTime::parse_from_rfc3339("2025-01-01T12:00:00.007Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(release_id(ts), "rel-20250101-120000007");
    }

    #[test]
    fn release_id_lexicographic_matches_chronological() {
        let earlier = DateTime::parse_from_rfc3339("2025-01-01T12:00:00.007Z")
            .unwrap()
            .with_timezone(&Utc);
        let later = DateTime::parse_from_rfc3339("2025-01-01T12:00:00.500Z")
            .unwrap()
            .with_timezone(&Utc);
        assert!(release_id(earlier) < release_id(later));
    }

    #[test]
    fn fixed_clock_advances_deterministically() {
        let clock = FixedClock::advancing(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z").unwrap().with_timezone(&Utc),
            chrono::Duration::milliseconds(1),
        );
        let first = clock.now();
        let second = clock.now();
        assert!(second > first);
    }
}
