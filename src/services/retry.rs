// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Response classification and exponential backoff.

use rand::Rng;
use std::time::Duration;

/// How a single HTTP attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// 429, 5xx (and transport failures, classified by the caller)
    Retryable,
    /// 401/403
    FatalAuth,
    /// 400/404/422 and any other non-success status
    FatalRequest,
}

pub fn classify(status: u16) -> Outcome {
    match status {
        200..=299 => Outcome::Success,
        429 | 500..=599 => Outcome::Retryable,
        401 | 403 => Outcome::FatalAuth,
        _ => Outcome::FatalRequest,
    }
}

/// Exponential backoff with multiplicative jitter.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts per call, the first one included
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Fractional jitter; 0.2 spreads each delay over ±20%
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &crate::config::Config) -> Self {
        Self {
            max_attempts: config.retry_max_attempts.max(1),
            base_delay: config.retry_base_delay,
            max_delay: config.retry_max_delay,
            jitter: 0.2,
        }
    }

    /// Delay before the next attempt, after `attempt` (1-based) has failed:
    /// `min(base * 2^(attempt-1), max)` scaled by a factor in `[1-jitter, 1+jitter]`.
    pub fn delay_for<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let nominal = self.nominal_delay(attempt);
        if self.jitter <= 0.0 {
            return nominal;
        }
        let factor = rng.gen_range((1.0 - self.jitter)..=(1.0 + self.jitter));
        nominal.mul_f64(factor)
    }

    /// Un-jittered delay after `attempt` has failed.
    pub fn nominal_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exp)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}
