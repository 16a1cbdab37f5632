// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Two-window request budget for the Strava API.
//!
//! Strava enforces a short window (100 requests per 15 minutes) and a daily
//! window (1000 requests, reset at UTC midnight). Every outbound attempt
//! must first [`reserve`](RateLimitTracker::reserve) budget in both windows
//! and afterwards [`record`](RateLimitTracker::record) what the response
//! reported. A single mutex guards both windows, so concurrent workers
//! can never jointly overshoot a ceiling.

use crate::time_utils::next_window_boundary;
use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use serde::Serialize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

/// Short-window pair (overall limit and usage).
pub const HEADER_LIMIT: &str = "X-RateLimit-Limit";
pub const HEADER_USAGE: &str = "X-RateLimit-Usage";
/// Read-specific pair; stricter than the overall pair for GET traffic.
pub const HEADER_READ_LIMIT: &str = "X-ReadRateLimit-Limit";
pub const HEADER_READ_USAGE: &str = "X-ReadRateLimit-Usage";
/// Seconds until the short window resets, when the provider sends it.
pub const HEADER_RESET: &str = "X-RateLimit-Reset";

/// Ceiling and usage reported by the provider for one window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportedWindow {
    pub limit: u32,
    pub usage: u32,
}

impl ReportedWindow {
    fn headroom(&self) -> u32 {
        self.limit.saturating_sub(self.usage)
    }

    /// Pick the pair that leaves less headroom.
    fn tighter(a: Option<Self>, b: Option<Self>) -> Option<Self> {
        match (a, b) {
            (Some(a), Some(b)) if b.headroom() < a.headroom() => Some(b),
            (Some(a), _) => Some(a),
            (None, b) => b,
        }
    }
}

/// Rate-limit metadata extracted from a response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateLimitHeaders {
    pub short: Option<ReportedWindow>,
    pub daily: Option<ReportedWindow>,
    pub reset_after: Option<Duration>,
}

impl RateLimitHeaders {
    /// Parse Strava's `"short,daily"` header pairs. Malformed values are ignored.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        type Pair = (Option<ReportedWindow>, Option<ReportedWindow>);
        let pair = |limit: &str, usage: &str| -> Pair {
            match (parse_pair(headers, limit), parse_pair(headers, usage)) {
                (Some((ls, ld)), Some((us, ud))) => (
                    Some(ReportedWindow { limit: ls, usage: us }),
                    Some(ReportedWindow { limit: ld, usage: ud }),
                ),
                _ => (None, None),
            }
        };

        let (overall_short, overall_daily) = pair(HEADER_LIMIT, HEADER_USAGE);
        let (read_short, read_daily) = pair(HEADER_READ_LIMIT, HEADER_READ_USAGE);

        let reset_after = headers
            .get(HEADER_RESET)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);

        Self {
            short: ReportedWindow::tighter(overall_short, read_short),
            daily: ReportedWindow::tighter(overall_daily, read_daily),
            reset_after,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.short.is_none() && self.daily.is_none() && self.reset_after.is_none()
    }
}

fn parse_pair(headers: &HeaderMap, name: &str) -> Option<(u32, u32)> {
    let value = headers.get(name)?.to_str().ok()?;
    let (a, b) = value.split_once(',')?;
    Some((a.trim().parse().ok()?, b.trim().parse().ok()?))
}

/// Budget granted by [`RateLimitTracker::reserve`]; hand it back to `record`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub struct Reservation {
    pub cost: u32,
}

#[derive(Debug, Clone)]
struct Window {
    ceiling: u32,
    consumed: u32,
    length: chrono::Duration,
    resets_at: DateTime<Utc>,
}

impl Window {
    fn new(ceiling: u32, length: chrono::Duration, now: DateTime<Utc>) -> Self {
        Self {
            ceiling,
            consumed: 0,
            length,
            resets_at: next_window_boundary(now, length),
        }
    }

    fn rearm_if_elapsed(&mut self, now: DateTime<Utc>) -> bool {
        if now < self.resets_at {
            return false;
        }
        self.consumed = 0;
        self.resets_at = next_window_boundary(now, self.length);
        true
    }

    fn has_room(&self, cost: u32) -> bool {
        self.consumed.saturating_add(cost) <= self.ceiling
    }

    fn until_reset(&self, now: DateTime<Utc>) -> Duration {
        (self.resets_at - now).to_std().unwrap_or(Duration::ZERO)
    }

    fn adopt(&mut self, reported: ReportedWindow) {
        self.ceiling = reported.limit;
        self.consumed = reported.usage.min(reported.limit);
    }

    fn snapshot(&self) -> WindowSnapshot {
        WindowSnapshot {
            ceiling: self.ceiling,
            consumed: self.consumed,
            resets_at: self.resets_at,
        }
    }
}

#[derive(Debug)]
struct Windows {
    short: Window,
    daily: Window,
}

impl Windows {
    fn rearm(&mut self, now: DateTime<Utc>) {
        if self.short.rearm_if_elapsed(now) {
            tracing::debug!(resets_at = %self.short.resets_at, "Short rate-limit window re-armed");
        }
        if self.daily.rearm_if_elapsed(now) {
            tracing::debug!(resets_at = %self.daily.resets_at, "Daily rate-limit window re-armed");
        }
    }
}

/// Point-in-time view of one window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct WindowSnapshot {
    pub ceiling: u32,
    pub consumed: u32,
    #[cfg_attr(feature = "binding-generation", ts(type = "string"))]
    pub resets_at: DateTime<Utc>,
}

/// API usage report (both windows).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct RateLimitSnapshot {
    pub short: WindowSnapshot,
    pub daily: WindowSnapshot,
}

/// Shared request budget. Wrap in an `Arc` and hand to every client.
#[derive(Debug)]
pub struct RateLimitTracker {
    windows: Mutex<Windows>,
}

impl RateLimitTracker {
    pub fn new(short_ceiling: u32, short_window: Duration, daily_ceiling: u32) -> Self {
        Self::new_at(short_ceiling, short_window, daily_ceiling, Utc::now())
    }

    pub fn new_at(
        short_ceiling: u32,
        short_window: Duration,
        daily_ceiling: u32,
        now: DateTime<Utc>,
    ) -> Self {
        let short_len = chrono::Duration::from_std(short_window)
            .unwrap_or_else(|_| chrono::Duration::minutes(15));
        Self {
            windows: Mutex::new(Windows {
                short: Window::new(short_ceiling, short_len, now),
                daily: Window::new(daily_ceiling, chrono::Duration::days(1), now),
            }),
        }
    }

    pub fn from_config(config: &crate::config::Config) -> Self {
        Self::new(
            config.rate_limit_short,
            config.rate_limit_short_window,
            config.rate_limit_daily,
        )
    }

    fn lock(&self) -> MutexGuard<'_, Windows> {
        self.windows.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reserve `cost` requests in both windows.
    ///
    /// On success the cost is charged immediately. Otherwise returns how
    /// long until every exhausted window has re-armed.
    pub fn reserve(&self, cost: u32) -> Result<Reservation, Duration> {
        self.reserve_at(cost, Utc::now())
    }

    pub fn reserve_at(&self, cost: u32, now: DateTime<Utc>) -> Result<Reservation, Duration> {
        let mut w = self.lock();
        w.rearm(now);

        let short_ok = w.short.has_room(cost);
        let daily_ok = w.daily.has_room(cost);
        if short_ok && daily_ok {
            w.short.consumed += cost;
            w.daily.consumed += cost;
            tracing::debug!(
                cost,
                short = w.short.consumed,
                daily = w.daily.consumed,
                "Rate limit reserved"
            );
            return Ok(Reservation { cost });
        }

        let mut wait = Duration::ZERO;
        if !short_ok {
            wait = wait.max(w.short.until_reset(now));
        }
        if !daily_ok {
            wait = wait.max(w.daily.until_reset(now));
        }
        tracing::debug!(
            cost,
            short = w.short.consumed,
            daily = w.daily.consumed,
            wait_secs = wait.as_secs(),
            "Rate limit exhausted"
        );
        Err(wait)
    }

    /// Reconcile after an attempt. Authoritative header counts replace the
    /// local ones; without headers the reserved cost stands.
    pub fn record(&self, reservation: Reservation, headers: &RateLimitHeaders) {
        self.record_at(reservation, headers, Utc::now());
    }

    pub fn record_at(
        &self,
        reservation: Reservation,
        headers: &RateLimitHeaders,
        now: DateTime<Utc>,
    ) {
        let mut w = self.lock();
        w.rearm(now);

        if let Some(short) = headers.short {
            w.short.adopt(short);
        }
        if let Some(daily) = headers.daily {
            w.daily.adopt(daily);
        }
        if let Some(after) = headers.reset_after {
            if let Ok(after) = chrono::Duration::from_std(after) {
                w.short.resets_at = now + after;
            }
        }

        tracing::debug!(
            cost = reservation.cost,
            authoritative = !headers.is_empty(),
            short = w.short.consumed,
            short_ceiling = w.short.ceiling,
            daily = w.daily.consumed,
            daily_ceiling = w.daily.ceiling,
            "Rate limit recorded"
        );
    }

    pub fn reset_if_elapsed(&self) {
        self.reset_if_elapsed_at(Utc::now());
    }

    pub fn reset_if_elapsed_at(&self, now: DateTime<Utc>) {
        self.lock().rearm(now);
    }

    pub fn snapshot(&self) -> RateLimitSnapshot {
        self.snapshot_at(Utc::now())
    }

    pub fn snapshot_at(&self, now: DateTime<Utc>) -> RateLimitSnapshot {
        let mut w = self.lock();
        w.rearm(now);
        RateLimitSnapshot {
            short: w.short.snapshot(),
            daily: w.daily.snapshot(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use reqwest::header::HeaderValue;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, h, m, s).unwrap()
    }

    fn tracker(short: u32, daily: u32) -> RateLimitTracker {
        RateLimitTracker::new_at(short, Duration::from_secs(900), daily, at(10, 0, 0))
    }

    #[test]
    fn blocks_at_short_ceiling() {
        let t = tracker(3, 1000);
        let now = at(10, 5, 0);
        for _ in 0..3 {
            assert!(t.reserve_at(1, now).is_ok());
        }
        let wait = t.reserve_at(1, now).unwrap_err();
        assert_eq!(wait, Duration::from_secs(600));
    }

    #[test]
    fn blocks_at_daily_ceiling_until_midnight() {
        let t = tracker(100, 2);
        let now = at(23, 0, 0);
        t.reserve_at(2, now).unwrap();
        let wait = t.reserve_at(1, now).unwrap_err();
        assert_eq!(wait, Duration::from_secs(3600));
    }

    #[test]
    fn wait_covers_every_blocking_window() {
        let t = tracker(1, 1);
        let now = at(23, 40, 0);
        t.reserve_at(1, now).unwrap();
        // Short window reopens at 23:45 but the daily one only at midnight.
        let wait = t.reserve_at(1, now).unwrap_err();
        assert_eq!(wait, Duration::from_secs(1200));
    }

    #[test]
    fn never_grants_past_ceiling() {
        let t = tracker(5, 1000);
        let now = at(10, 1, 0);
        t.reserve_at(4, now).unwrap();
        assert!(t.reserve_at(2, now).is_err());
        assert!(t.reserve_at(1, now).is_ok());
        assert!(t.reserve_at(1, now).is_err());
        assert_eq!(t.snapshot_at(now).short.consumed, 5);
    }

    #[test]
    fn rearms_exactly_at_reset() {
        let t = tracker(1, 1000);
        t.reserve_at(1, at(10, 14, 59)).unwrap();
        assert!(t.reserve_at(1, at(10, 14, 59)).is_err());

        t.reset_if_elapsed_at(at(10, 15, 0));
        let snap = t.snapshot_at(at(10, 15, 0));
        assert_eq!(snap.short.consumed, 0);
        assert_eq!(snap.short.resets_at, at(10, 30, 0));
        // Daily window keeps its count across the short reset.
        assert_eq!(snap.daily.consumed, 1);
        assert!(t.reserve_at(1, at(10, 15, 0)).is_ok());
    }

    #[test]
    fn headers_override_local_counts() {
        let t = tracker(100, 1000);
        let now = at(10, 1, 0);
        let r = t.reserve_at(1, now).unwrap();
        let headers = RateLimitHeaders {
            short: Some(ReportedWindow { limit: 100, usage: 42 }),
            daily: Some(ReportedWindow { limit: 1000, usage: 420 }),
            reset_after: None,
        };
        t.record_at(r, &headers, now);

        let snap = t.snapshot_at(now);
        assert_eq!(snap.short.consumed, 42);
        assert_eq!(snap.daily.consumed, 420);
    }

    #[test]
    fn reported_usage_is_clamped_to_ceiling() {
        let t = tracker(100, 1000);
        let now = at(10, 1, 0);
        let r = t.reserve_at(1, now).unwrap();
        let headers = RateLimitHeaders {
            short: Some(ReportedWindow { limit: 100, usage: 130 }),
            daily: None,
            reset_after: None,
        };
        t.record_at(r, &headers, now);
        assert_eq!(t.snapshot_at(now).short.consumed, 100);
        assert!(t.reserve_at(1, now).is_err());
    }

    #[test]
    fn without_headers_reserved_cost_stands() {
        let t = tracker(100, 1000);
        let now = at(10, 1, 0);
        let r = t.reserve_at(1, now).unwrap();
        t.record_at(r, &RateLimitHeaders::default(), now);
        assert_eq!(t.snapshot_at(now).short.consumed, 1);
    }

    #[test]
    fn reset_header_moves_short_window() {
        let t = tracker(100, 1000);
        let now = at(10, 1, 0);
        let r = t.reserve_at(1, now).unwrap();
        let headers = RateLimitHeaders {
            reset_after: Some(Duration::from_secs(30)),
            ..Default::default()
        };
        t.record_at(r, &headers, now);
        assert_eq!(t.snapshot_at(now).short.resets_at, at(10, 1, 30));
    }

    #[test]
    fn parses_strava_headers_and_takes_tighter_pair() {
        let mut headers = HeaderMap::new();
        headers.insert(HEADER_LIMIT, HeaderValue::from_static("200,2000"));
        headers.insert(HEADER_USAGE, HeaderValue::from_static("10,500"));
        headers.insert(HEADER_READ_LIMIT, HeaderValue::from_static("100,1000"));
        headers.insert(HEADER_READ_USAGE, HeaderValue::from_static("20,100"));

        let parsed = RateLimitHeaders::from_headers(&headers);
        assert_eq!(parsed.short, Some(ReportedWindow { limit: 100, usage: 20 }));
        assert_eq!(parsed.daily, Some(ReportedWindow { limit: 1000, usage: 100 }));
        assert_eq!(parsed.reset_after, None);
    }

    #[test]
    fn malformed_headers_are_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert(HEADER_LIMIT, HeaderValue::from_static("lots"));
        headers.insert(HEADER_USAGE, HeaderValue::from_static("1,2"));
        assert!(RateLimitHeaders::from_headers(&headers).is_empty());
    }
}
