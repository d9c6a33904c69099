//! Injectable time source.
//!
//! Session billing and campaign-window checks must be deterministic under
//! test, so every operation that needs the current time takes a `&dyn Clock`
//! instead of calling `Utc::now()` inline.

use chrono::{DateTime, NaiveDate, Utc};

/// Time collaborator: `now()` for session timing, `today()` for
/// campaign-window and visit-date checks.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }
}

/// Production clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock pinned to a fixed instant. Used by the test suites and by the
/// demo/simulation tooling.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl FixedClock {
    /// Build from a `YYYY-MM-DD HH:MM:SS` literal. Panics on a malformed
    /// literal, which is acceptable for test fixtures.
    pub fn at(literal: &str) -> Self {
        let naive = chrono::NaiveDateTime::parse_from_str(literal, "%Y-%m-%d %H:%M:%S")
            .expect("valid fixture timestamp");
        FixedClock(naive.and_utc())
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_clock_now_and_today() {
        let clock = FixedClock::at("2024-03-15 13:45:00");
        assert_eq!(clock.now().to_rfc3339(), "2024-03-15T13:45:00+00:00");
        assert_eq!(clock.today().to_string(), "2024-03-15");
    }

    #[test]
    fn test_system_clock_is_monotonic_enough() {
        let clock = SystemClock;
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
