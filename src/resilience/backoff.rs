//! Exponential backoff with jitter.

use std::time::Duration;

use rand::Rng;

use crate::config::ThrottleConfig;

/// Delay schedule between retries: `min(base * 2^retry, max)` plus up to 10% jitter.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    base_ms: u64,
    max_ms: u64,
}

impl Backoff {
    pub fn new(base_ms: u64, max_ms: u64) -> Self {
        Self { base_ms, max_ms }
    }

    pub fn from_config(config: &ThrottleConfig) -> Self {
        Self::new(config.base_delay_ms, config.max_delay_ms)
    }

    /// Delay before retry number `retry` (0 for the first retry), without jitter.
    pub fn base_delay(&self, retry: u32) -> Duration {
        let factor = 2u64.saturating_pow(retry);
        Duration::from_millis(self.base_ms.saturating_mul(factor).min(self.max_ms))
    }

    /// Delay before retry number `retry`, with jitter so callers do not retry in lockstep.
    pub fn delay(&self, retry: u32) -> Duration {
        let capped = self.base_delay(retry);

        let jitter_range = capped.as_millis() as u64 / 10;
        let jitter = if jitter_range > 0 {
            rand::thread_rng().gen_range(0..jitter_range)
        } else {
            0
        };

        capped + Duration::from_millis(jitter)
    }
}
