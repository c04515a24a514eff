//! Circuit breaker for dependency protection.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: dependency assumed down, calls fail fast
//! - Half-Open: one probe call tests whether the dependency recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive_failures >= failure_threshold
//! Open → Half-Open: first availability check after the recovery timeout
//! Half-Open → Closed: probe succeeds
//! Half-Open → Open: probe fails (recovery timer restarts)
//! ```
//!
//! # Design Decisions
//! - Per-service circuit breaker (not global)
//! - Fail fast in Open state (no waiting for timeout)
//! - Single probe in Half-Open; a probe that never reports is replaced after
//!   another recovery timeout
//! - Client errors (4xx except 429) count as the dependency answering

use std::collections::BTreeMap;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use dashmap::mapref::one::RefMut;
use dashmap::DashMap;
use serde::Serialize;
use tokio::time::Instant;

use crate::config::{ServiceConfig, ServiceTable};
use crate::error::{CallError, GovernorError};
use crate::health::score::service_score;
use crate::observability::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    fn gauge(self) -> f64 {
        match self {
            CircuitState::Closed => 0.0,
            CircuitState::HalfOpen => 1.0,
            CircuitState::Open => 2.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::HalfOpen => "half_open",
            CircuitState::Open => "open",
        }
    }
}

/// Failure bookkeeping and breaker state for one service.
#[derive(Debug, Clone)]
pub struct ServiceHealth {
    pub consecutive_failures: u32,
    pub total_failures: u64,
    pub last_error: Option<Instant>,
    pub state: CircuitState,
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
    /// Open: when a probe may start. Half-Open: when an unanswered probe lapses.
    pub next_attempt: Option<Instant>,
}

impl ServiceHealth {
    pub fn new(limits: &ServiceConfig) -> Self {
        Self {
            consecutive_failures: 0,
            total_failures: 0,
            last_error: None,
            state: CircuitState::Closed,
            failure_threshold: limits.failure_threshold,
            recovery_timeout: limits.recovery_timeout(),
            next_attempt: None,
        }
    }

    /// Whether a call may go through now. Moves Open → Half-Open once the
    /// recovery timeout has passed; returns the new state when it changed.
    fn check_available(&mut self, now: Instant) -> (bool, Option<CircuitState>) {
        match self.state {
            CircuitState::Closed => (true, None),
            CircuitState::Open => {
                if self.next_attempt.is_some_and(|at| now >= at) {
                    self.state = CircuitState::HalfOpen;
                    self.next_attempt = Some(now + self.recovery_timeout);
                    (true, Some(CircuitState::HalfOpen))
                } else {
                    (false, None)
                }
            }
            CircuitState::HalfOpen => {
                if self.next_attempt.is_some_and(|at| now >= at) {
                    // The previous probe never reported; allow another.
                    self.next_attempt = Some(now + self.recovery_timeout);
                    (true, None)
                } else {
                    (false, None)
                }
            }
        }
    }

    fn on_success(&mut self) -> Option<CircuitState> {
        self.consecutive_failures = 0;
        if self.state == CircuitState::HalfOpen {
            self.state = CircuitState::Closed;
            self.next_attempt = None;
            Some(CircuitState::Closed)
        } else {
            None
        }
    }

    fn on_failure(&mut self, now: Instant) -> Option<CircuitState> {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.total_failures += 1;
        self.last_error = Some(now);

        match self.state {
            CircuitState::Closed if self.consecutive_failures >= self.failure_threshold => {
                self.open(now);
                Some(CircuitState::Open)
            }
            CircuitState::HalfOpen => {
                self.open(now);
                Some(CircuitState::Open)
            }
            _ => None,
        }
    }

    fn open(&mut self, now: Instant) {
        self.state = CircuitState::Open;
        self.next_attempt = Some(now + self.recovery_timeout);
    }

    /// Time until an open circuit admits a probe.
    pub fn retry_after(&self, now: Instant) -> Option<Duration> {
        match self.state {
            CircuitState::Closed => None,
            _ => self.next_attempt.map(|at| at.saturating_duration_since(now)),
        }
    }

    pub fn score(&self, now: Instant) -> u8 {
        service_score(
            self.state,
            self.last_error.map(|at| now.saturating_duration_since(at)),
            self.consecutive_failures,
        )
    }
}

/// Read-only view of one service's health.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceHealthStatus {
    pub total_failures: u64,
    pub consecutive_failures: u32,
    pub circuit_state: CircuitState,
    pub health_score: u8,
}

/// Per-service circuit breakers with failure accounting.
pub struct HealthTracker {
    records: DashMap<String, ServiceHealth>,
    table: ArcSwap<ServiceTable>,
}

impl HealthTracker {
    pub fn new(table: ServiceTable) -> Self {
        Self {
            records: DashMap::new(),
            table: ArcSwap::from_pointee(table),
        }
    }

    /// Breaker thresholds apply to every service; unconfigured ones use the defaults.
    fn record(&self, service: &str) -> RefMut<'_, String, ServiceHealth> {
        if let Some(record) = self.records.get_mut(service) {
            return record;
        }
        let table = self.table.load();
        let limits = table.services.get(service).unwrap_or(&table.defaults);
        self.records
            .entry(service.to_string())
            .or_insert_with(|| ServiceHealth::new(limits))
    }

    fn log_transition(service: &str, state: CircuitState, record: &ServiceHealth) {
        match state {
            CircuitState::Open => tracing::warn!(
                service = %service,
                consecutive_failures = record.consecutive_failures,
                recovery_timeout = ?record.recovery_timeout,
                "Circuit opened"
            ),
            CircuitState::HalfOpen => tracing::info!(service = %service, "Circuit half-open, probing"),
            CircuitState::Closed => tracing::info!(service = %service, "Circuit closed"),
        }
        metrics::record_circuit_state(service, state.gauge(), state.as_str());
    }

    pub fn record_success(&self, service: &str) {
        let mut record = self.record(service);
        if let Some(state) = record.on_success() {
            Self::log_transition(service, state, &record);
        }
    }

    pub fn record_failure(&self, service: &str, error: &impl Display) {
        let mut record = self.record(service);
        tracing::debug!(service = %service, error = %error, "Recording failure");
        if let Some(state) = record.on_failure(Instant::now()) {
            Self::log_transition(service, state, &record);
        }
    }

    /// Whether calls to `service` may proceed. May move Open → Half-Open.
    pub fn is_available(&self, service: &str) -> bool {
        let mut record = self.record(service);
        let (available, transition) = record.check_available(Instant::now());
        if let Some(state) = transition {
            Self::log_transition(service, state, &record);
        }
        available
    }

    /// Run `operation` unless the circuit is open, recording its outcome.
    pub async fn execute_guarded<T, E, F, Fut>(&self, service: &str, operation: F) -> Result<T, GovernorError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: CallError,
    {
        if !self.is_available(service) {
            let retry_after = self
                .records
                .get(service)
                .and_then(|record| record.retry_after(Instant::now()));
            tracing::debug!(service = %service, retry_after = ?retry_after, "Circuit open, failing fast");
            return Err(GovernorError::ServiceUnavailable {
                service: service.to_string(),
                retry_after,
            });
        }

        match operation().await {
            Ok(value) => {
                self.record_success(service);
                Ok(value)
            }
            Err(e) => {
                let trips = e.trips_breaker();
                let err = e.into_governor_error(service);
                if trips {
                    self.record_failure(service, &err);
                } else {
                    self.record_success(service);
                }
                Err(err)
            }
        }
    }

    pub fn state(&self, service: &str) -> Option<CircuitState> {
        self.records.get(service).map(|record| record.state)
    }

    /// Snapshot without triggering any transition.
    pub fn status(&self) -> BTreeMap<String, ServiceHealthStatus> {
        let now = Instant::now();
        self.records
            .iter()
            .map(|entry| {
                let record = entry.value();
                (
                    entry.key().clone(),
                    ServiceHealthStatus {
                        total_failures: record.total_failures,
                        consecutive_failures: record.consecutive_failures,
                        circuit_state: record.state,
                        health_score: record.score(now),
                    },
                )
            })
            .collect()
    }

    /// Mean health score, 100 when no service has been called.
    pub fn mean_score(&self) -> f64 {
        let now = Instant::now();
        let (sum, count) = self.records.iter().fold((0.0, 0usize), |(sum, count), entry| {
            (sum + f64::from(entry.value().score(now)), count + 1)
        });
        if count == 0 {
            100.0
        } else {
            sum / count as f64
        }
    }

    /// Forget all failure history and breaker state.
    pub fn reset(&self) {
        self.records.clear();
        tracing::info!("Error metrics reset");
    }

    /// Close every circuit. Failure totals are kept.
    pub fn force_close_all(&self) {
        for mut entry in self.records.iter_mut() {
            let record = entry.value_mut();
            record.consecutive_failures = 0;
            record.next_attempt = None;
            if record.state != CircuitState::Closed {
                record.state = CircuitState::Closed;
                Self::log_transition(entry.key(), CircuitState::Closed, entry.value());
            }
        }
        tracing::warn!("All circuits force-closed");
    }

    /// Swap in a new service table; existing records adopt the new thresholds.
    pub fn apply(&self, table: ServiceTable) {
        for mut entry in self.records.iter_mut() {
            let limits = table.services.get(entry.key()).unwrap_or(&table.defaults);
            let record = entry.value_mut();
            record.failure_threshold = limits.failure_threshold;
            record.recovery_timeout = limits.recovery_timeout();
        }
        self.table.store(Arc::new(table));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::UpstreamError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn tracker() -> HealthTracker {
        HealthTracker::new(ServiceTable::default())
    }

    fn fail(tracker: &HealthTracker, service: &str, times: usize) {
        for _ in 0..times {
            tracker.record_failure(service, &"boom");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_threshold() {
        let tracker = tracker();
        fail(&tracker, "llm-primary", 4);
        assert!(tracker.is_available("llm-primary"));
        assert_eq!(tracker.state("llm-primary"), Some(CircuitState::Closed));

        fail(&tracker, "llm-primary", 1);
        assert_eq!(tracker.state("llm-primary"), Some(CircuitState::Open));
        assert!(!tracker.is_available("llm-primary"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_admits_single_probe() {
        let tracker = tracker();
        fail(&tracker, "svc", 5);

        tokio::time::advance(Duration::from_millis(29_999)).await;
        assert!(!tracker.is_available("svc"));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(tracker.is_available("svc"));
        assert_eq!(tracker.state("svc"), Some(CircuitState::HalfOpen));
        assert!(!tracker.is_available("svc"));
        assert!(!tracker.is_available("svc"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens_with_fresh_timer() {
        let tracker = tracker();
        fail(&tracker, "svc", 5);
        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(tracker.is_available("svc"));

        tokio::time::advance(Duration::from_secs(5)).await;
        fail(&tracker, "svc", 1);
        assert_eq!(tracker.state("svc"), Some(CircuitState::Open));

        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(!tracker.is_available("svc"));
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(tracker.is_available("svc"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_success_closes() {
        let tracker = tracker();
        fail(&tracker, "svc", 5);
        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(tracker.is_available("svc"));

        tracker.record_success("svc");
        assert_eq!(tracker.state("svc"), Some(CircuitState::Closed));
        let status = tracker.status();
        assert_eq!(status["svc"].consecutive_failures, 0);
        assert_eq!(status["svc"].total_failures, 5);
        assert!(tracker.is_available("svc"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lapsed_probe_is_replaced() {
        let tracker = tracker();
        fail(&tracker, "svc", 5);
        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(tracker.is_available("svc"));
        assert!(!tracker.is_available("svc"));

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(tracker.is_available("svc"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_guarded_fails_fast_when_open() {
        let tracker = tracker();
        fail(&tracker, "svc", 5);

        let counter = AtomicU32::new(0);
        let calls = &counter;
        let err = tracker
            .execute_guarded("svc", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, UpstreamError>(())
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        match err {
            GovernorError::ServiceUnavailable { service, retry_after } => {
                assert_eq!(service, "svc");
                assert_eq!(retry_after, Some(Duration::from_secs(30)));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_guarded_records_outcomes() {
        let tracker = tracker();
        for _ in 0..5 {
            let _ = tracker
                .execute_guarded("svc", || async { Err::<(), _>(UpstreamError::status(500, "down")) })
                .await;
        }
        assert_eq!(tracker.state("svc"), Some(CircuitState::Open));
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_errors_do_not_trip() {
        let tracker = tracker();
        fail(&tracker, "svc", 4);
        let err = tracker
            .execute_guarded("svc", || async { Err::<(), _>(UpstreamError::status(404, "missing")) })
            .await
            .unwrap_err();
        assert!(matches!(err, GovernorError::Upstream { .. }));
        assert_eq!(tracker.status()["svc"].consecutive_failures, 0);
        assert_eq!(tracker.state("svc"), Some(CircuitState::Closed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_close_and_reset() {
        let tracker = tracker();
        fail(&tracker, "a", 5);
        fail(&tracker, "b", 7);

        tracker.force_close_all();
        assert_eq!(tracker.state("a"), Some(CircuitState::Closed));
        assert_eq!(tracker.status()["b"].total_failures, 7);
        assert!(tracker.is_available("b"));

        tracker.reset();
        assert!(tracker.status().is_empty());
        assert_eq!(tracker.mean_score(), 100.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_configured_threshold_applies() {
        let mut table = ServiceTable::default();
        table.services.insert(
            "flaky".to_string(),
            ServiceConfig {
                failure_threshold: 2,
                recovery_timeout_ms: 1_000,
                ..ServiceConfig::default()
            },
        );
        let tracker = HealthTracker::new(table);
        fail(&tracker, "flaky", 2);
        assert_eq!(tracker.state("flaky"), Some(CircuitState::Open));
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(tracker.is_available("flaky"));
    }
}
