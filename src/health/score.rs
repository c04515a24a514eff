//! Health scoring.
//!
//! # Service score bands (0-100)
//! ```text
//! Open circuit                      →   0
//! Half-open circuit                 →  25
//! No error, or last error ≥ 24h ago → 100
//! Last error ≥ 1h ago               →  75
//! No consecutive failures           →  90
//! Fewer than 3 consecutive failures →  60
//! Otherwise                         →  30
//! ```
//!
//! # Aggregate weights
//! queue depth 25%, breakers 30%, storage 25%, rate limiter 20%

use std::time::Duration;

use serde::Serialize;

use crate::resilience::circuit_breaker::CircuitState;

const DAY: Duration = Duration::from_secs(24 * 60 * 60);
const HOUR: Duration = Duration::from_secs(60 * 60);

pub fn service_score(state: CircuitState, since_last_error: Option<Duration>, consecutive_failures: u32) -> u8 {
    match state {
        CircuitState::Open => 0,
        CircuitState::HalfOpen => 25,
        CircuitState::Closed => match since_last_error {
            None => 100,
            Some(age) if age >= DAY => 100,
            Some(age) if age >= HOUR => 75,
            Some(_) if consecutive_failures == 0 => 90,
            Some(_) if consecutive_failures < 3 => 60,
            Some(_) => 30,
        },
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthLevel {
    Excellent,
    Good,
    Fair,
    Poor,
    Critical,
}

impl HealthLevel {
    pub fn from_score(score: f64) -> Self {
        if score >= 90.0 {
            HealthLevel::Excellent
        } else if score >= 75.0 {
            HealthLevel::Good
        } else if score >= 60.0 {
            HealthLevel::Fair
        } else if score >= 40.0 {
            HealthLevel::Poor
        } else {
            HealthLevel::Critical
        }
    }
}

/// Health of an external store, reported by the collaborator that owns it.
pub trait HealthProbe: Send + Sync {
    /// Score in 0-100.
    fn score(&self) -> f64;
}

/// Per-subsystem inputs to the aggregate score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HealthInputs {
    pub queue_size: usize,
    pub queue_capacity: usize,
    /// Mean breaker score, 0-100.
    pub breaker_score: f64,
    /// Storage collaborator score, 0-100.
    pub storage_score: f64,
    /// Mean rate limiter utilisation, 0-100.
    pub limiter_utilization: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AggregateHealth {
    pub score: f64,
    pub level: HealthLevel,
}

impl AggregateHealth {
    pub fn from_inputs(inputs: &HealthInputs) -> Self {
        let queue_score = if inputs.queue_capacity == 0 {
            100.0
        } else {
            100.0 * (1.0 - inputs.queue_size as f64 / inputs.queue_capacity as f64)
        };
        let limiter_score = 100.0 - inputs.limiter_utilization;

        let score = 0.25 * queue_score.clamp(0.0, 100.0)
            + 0.30 * inputs.breaker_score.clamp(0.0, 100.0)
            + 0.25 * inputs.storage_score.clamp(0.0, 100.0)
            + 0.20 * limiter_score.clamp(0.0, 100.0);
        let score = (score * 10.0).round() / 10.0;

        Self {
            score,
            level: HealthLevel::from_score(score),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_score_bands() {
        let minute = Some(Duration::from_secs(60));
        assert_eq!(service_score(CircuitState::Open, minute, 9), 0);
        assert_eq!(service_score(CircuitState::HalfOpen, minute, 9), 25);
        assert_eq!(service_score(CircuitState::Closed, None, 0), 100);
        assert_eq!(service_score(CircuitState::Closed, Some(DAY), 4), 100);
        assert_eq!(service_score(CircuitState::Closed, Some(HOUR * 2), 4), 75);
        assert_eq!(service_score(CircuitState::Closed, minute, 0), 90);
        assert_eq!(service_score(CircuitState::Closed, minute, 2), 60);
        assert_eq!(service_score(CircuitState::Closed, minute, 3), 30);
    }

    #[test]
    fn test_level_thresholds() {
        assert_eq!(HealthLevel::from_score(90.0), HealthLevel::Excellent);
        assert_eq!(HealthLevel::from_score(89.9), HealthLevel::Good);
        assert_eq!(HealthLevel::from_score(75.0), HealthLevel::Good);
        assert_eq!(HealthLevel::from_score(60.0), HealthLevel::Fair);
        assert_eq!(HealthLevel::from_score(40.0), HealthLevel::Poor);
        assert_eq!(HealthLevel::from_score(39.9), HealthLevel::Critical);
    }

    #[test]
    fn test_aggregate_weights() {
        let idle = AggregateHealth::from_inputs(&HealthInputs {
            queue_size: 0,
            queue_capacity: 100,
            breaker_score: 100.0,
            storage_score: 100.0,
            limiter_utilization: 0.0,
        });
        assert_eq!(idle.score, 100.0);
        assert_eq!(idle.level, HealthLevel::Excellent);

        // Full queue, one open breaker out of two, storage fine, limiter half used.
        let stressed = AggregateHealth::from_inputs(&HealthInputs {
            queue_size: 100,
            queue_capacity: 100,
            breaker_score: 50.0,
            storage_score: 100.0,
            limiter_utilization: 50.0,
        });
        assert_eq!(stressed.score, 50.0);
        assert_eq!(stressed.level, HealthLevel::Poor);
    }
}
