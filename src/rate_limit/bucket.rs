//! Token bucket for a single service.

use std::time::Duration;

use tokio::time::Instant;

use crate::config::ServiceConfig;

/// A lazily refilled token bucket.
///
/// Tokens are topped up from elapsed time on every access; there is no
/// background refill task. `0 <= tokens <= max_tokens` always holds.
#[derive(Debug, Clone)]
pub struct RateBucket {
    tokens: f64,
    max_tokens: f64,
    refill_rate: f64,
    last_refill: Instant,
}

impl RateBucket {
    /// Create a full bucket.
    pub fn new(limits: &ServiceConfig, now: Instant) -> Self {
        Self {
            tokens: limits.max_tokens,
            max_tokens: limits.max_tokens,
            refill_rate: limits.refill_rate,
            last_refill: now,
        }
    }

    fn refill(&mut self, now: Instant) {
        self.tokens = self.projected(now);
        self.last_refill = now;
    }

    /// Token count at `now` without touching the bucket.
    fn projected(&self, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        (self.tokens + elapsed * self.refill_rate).min(self.max_tokens)
    }

    /// Refill for elapsed time, then take one token if available.
    pub fn try_consume(&mut self, now: Instant) -> bool {
        self.refill(now);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Tokens that would be available at `now`.
    pub fn available(&self, now: Instant) -> f64 {
        self.projected(now)
    }

    pub fn max_tokens(&self) -> f64 {
        self.max_tokens
    }

    /// Share of capacity currently in use, 0-100.
    pub fn utilization_percent(&self, now: Instant) -> f64 {
        if self.max_tokens <= 0.0 {
            return 0.0;
        }
        ((self.max_tokens - self.projected(now)) / self.max_tokens * 100.0).clamp(0.0, 100.0)
    }

    /// Sleep between checks while waiting: `ceil(1000 / refill_rate)` ms,
    /// saturating for very slow rates.
    pub fn poll_interval(&self) -> Duration {
        // Float to int casts saturate at u64::MAX.
        Duration::from_millis((1000.0 / self.refill_rate).ceil() as u64)
    }

    /// Time until one whole token is available.
    pub fn time_until_token(&self, now: Instant) -> Duration {
        let missing = 1.0 - self.projected(now);
        if missing <= 0.0 {
            Duration::ZERO
        } else {
            Duration::try_from_secs_f64(missing / self.refill_rate).unwrap_or(Duration::MAX)
        }
    }

    /// Adopt new limits, keeping the current fill level within the new capacity.
    pub fn reconfigure(&mut self, limits: &ServiceConfig, now: Instant) {
        self.refill(now);
        self.max_tokens = limits.max_tokens;
        self.refill_rate = limits.refill_rate;
        self.tokens = self.tokens.min(self.max_tokens);
    }
}
