// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Shared helpers for date/time arithmetic.

use chrono::{DateTime, Duration, NaiveDate, Utc};

/// Next wall-clock boundary of a fixed-length window strictly after `now`.
///
/// Boundaries are multiples of `window` since the Unix epoch, so a 15-minute
/// window resets on the quarter hour and a 24-hour window at UTC midnight.
pub fn next_window_boundary(now: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    let len = window.num_seconds().max(1);
    let ts = now.timestamp();
    let next = (ts.div_euclid(len) + 1) * len;
    DateTime::from_timestamp(next, 0).unwrap_or(now + window)
}

/// Every calendar day from `start` to `end`, inclusive.
pub fn days_inclusive(start: NaiveDate, end: NaiveDate) -> impl Iterator<Item = NaiveDate> {
    start.iter_days().take_while(move |d| *d <= end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn quarter_hour_boundary() {
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 10, 7, 30).unwrap();
        let next = next_window_boundary(now, Duration::minutes(15));
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 3, 1, 10, 15, 0).unwrap());
    }

    #[test]
    fn boundary_is_strictly_after_now() {
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 10, 15, 0).unwrap();
        let next = next_window_boundary(now, Duration::minutes(15));
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 3, 1, 10, 30, 0).unwrap());
    }

    #[test]
    fn daily_boundary_is_utc_midnight() {
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 23, 59, 59).unwrap();
        let next = next_window_boundary(now, Duration::hours(24));
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 3, 2, 0, 0, 0).unwrap());
    }

    #[test]
    fn days_inclusive_spans_month_end() {
        let start = NaiveDate::from_ymd_opt(2025, 1, 30).unwrap();
        let end = NaiveDate::from_ymd_opt(2025, 2, 2).unwrap();
        let days: Vec<_> = days_inclusive(start, end).collect();
        assert_eq!(days.len(), 4);
        assert_eq!(days[3], end);
    }

    #[test]
    fn days_inclusive_empty_when_reversed() {
        let start = NaiveDate::from_ymd_opt(2025, 2, 2).unwrap();
        let end = NaiveDate::from_ymd_opt(2025, 2, 1).unwrap();
        assert_eq!(days_inclusive(start, end).count(), 0);
    }
}
