//! Composition root: one entry point for every outbound call.
//!
//! # Data Flow
//! ```text
//! governed_call(service, user, type, op)
//!     → AdmissionQueue::submit      (per-user and global ceilings)
//!     → RateLimiter::execute_throttled (token per attempt, retries)
//!     → HealthTracker::execute_guarded (fail fast on open circuit)
//!     → op()
//!     → outcome recorded in the breaker
//! ```
//!
//! # Design Decisions
//! - One explicit instance per process, shared as `Arc<Governor>`
//! - State is per process; horizontally scaled instances do not coordinate

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use serde::Serialize;

use crate::admission::{AdmissionQueue, QueueStatus, RequestType};
use crate::config::GovernorConfig;
use crate::error::{CallError, GovernorError, UpstreamError};
use crate::health::{AggregateHealth, HealthInputs, HealthProbe};
use crate::observability::metrics;
use crate::rate_limit::{BucketStatus, RateLimiter};
use crate::resilience::{CircuitState, HealthTracker, ServiceHealthStatus};

/// Per-service breaker health plus the system-wide aggregate.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub services: BTreeMap<String, ServiceHealthStatus>,
    pub aggregate: AggregateHealth,
}

/// One guarded attempt that failed. An attempt whose failure left the
/// circuit open ends the retry loop with that failure.
struct AttemptFailure {
    error: GovernorError,
    circuit_open: bool,
}

impl CallError for AttemptFailure {
    fn is_retryable(&self) -> bool {
        !self.circuit_open && self.error.is_retryable()
    }

    fn trips_breaker(&self) -> bool {
        self.error.trips_breaker()
    }

    fn into_governor_error(self, _service: &str) -> GovernorError {
        self.error
    }
}

pub struct Governor {
    limiter: RateLimiter,
    tracker: HealthTracker,
    queue: AdmissionQueue,
    storage_probe: Option<Arc<dyn HealthProbe>>,
}

impl Governor {
    pub fn new(config: &GovernorConfig) -> Self {
        let table = config.service_table();
        Self {
            limiter: RateLimiter::new(table.clone(), config.throttle.clone()),
            tracker: HealthTracker::new(table),
            queue: AdmissionQueue::new(config.admission.clone()),
            storage_probe: None,
        }
    }

    /// Report storage health from `probe` in the aggregate score.
    pub fn with_storage_probe(mut self, probe: Arc<dyn HealthProbe>) -> Self {
        self.storage_probe = Some(probe);
        self
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn health_tracker(&self) -> &HealthTracker {
        &self.tracker
    }

    pub fn admission_queue(&self) -> &AdmissionQueue {
        &self.queue
    }

    /// Run `operation` against `service` on behalf of `user_id`.
    ///
    /// The operation may run more than once: retryable failures are retried
    /// with backoff, each attempt taking its own rate limit token. Its own
    /// failure comes back as [`GovernorError::Upstream`] with the source
    /// unchanged.
    pub async fn governed_call<T, F, Fut>(
        &self,
        service: &str,
        user_id: &str,
        request_type: RequestType,
        operation: F,
    ) -> Result<T, GovernorError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, UpstreamError>>,
    {
        let start = std::time::Instant::now();

        if !self.limiter.is_allowed(service) {
            tracing::warn!(service = %service, user_id = %user_id, "Rejected call to unknown service");
            metrics::record_call(service, "configuration", start);
            return Err(GovernorError::UnknownService(service.to_string()));
        }

        let max_retries = self.limiter.max_retries();
        let operation = &operation;
        let result = self
            .queue
            .submit(user_id, request_type, || async move {
                self.limiter
                    .execute_throttled(service, max_retries, || async move {
                        self.tracker
                            .execute_guarded(service, operation)
                            .await
                            .map_err(|error| AttemptFailure {
                                circuit_open: self.tracker.state(service) == Some(CircuitState::Open),
                                error,
                            })
                    })
                    .await
            })
            .await;

        match &result {
            Ok(_) => metrics::record_call(service, "success", start),
            Err(err) => {
                metrics::record_call(service, err.kind().as_str(), start);
                tracing::debug!(
                    service = %service,
                    user_id = %user_id,
                    request_type = %request_type,
                    error = %err,
                    "Governed call failed"
                );
            }
        }
        result
    }

    pub fn queue_status(&self) -> QueueStatus {
        self.queue.status()
    }

    pub fn rate_limiter_status(&self) -> BTreeMap<String, BucketStatus> {
        self.limiter.status()
    }

    pub fn health_status(&self) -> HealthReport {
        HealthReport {
            services: self.tracker.status(),
            aggregate: self.system_health(),
        }
    }

    /// Weighted system score over queue depth, breakers, storage and limiter.
    pub fn system_health(&self) -> AggregateHealth {
        let queue = self.queue.status();
        AggregateHealth::from_inputs(&HealthInputs {
            queue_size: queue.queue_size,
            queue_capacity: self.queue.config().queue_max_size,
            breaker_score: self.tracker.mean_score(),
            storage_score: self.storage_probe.as_ref().map_or(100.0, |probe| probe.score()),
            limiter_utilization: self.limiter.mean_utilization(),
        })
    }

    pub fn reset_queue(&self) {
        self.queue.reset();
    }

    pub fn reset_rate_limits(&self) {
        self.limiter.reset();
    }

    pub fn reset_error_metrics(&self) {
        self.tracker.reset();
    }

    pub fn force_close_all_circuits(&self) {
        self.tracker.force_close_all();
    }

    /// Hot-reload the service table. Admission ceilings are fixed at startup.
    pub fn apply_config(&self, config: &GovernorConfig) {
        let table = config.service_table();
        self.limiter.apply(table.clone());
        self.tracker.apply(table);

        if config.admission != *self.queue.config() {
            tracing::warn!("Admission settings changed; restart to apply them");
        }
        tracing::info!(services = config.services.len(), "Service table reloaded");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::HealthLevel;

    struct FixedProbe(f64);

    impl HealthProbe for FixedProbe {
        fn score(&self) -> f64 {
            self.0
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_service_rejected_before_admission() {
        let governor = Governor::new(&GovernorConfig::default());
        let err = governor
            .governed_call("nope", "alice", RequestType::Chat, || async { Ok::<_, UpstreamError>(()) })
            .await
            .unwrap_err();
        assert!(matches!(err, GovernorError::UnknownService(ref s) if s == "nope"));
        assert_eq!(governor.queue_status().global_active_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_error_passes_through() {
        let governor = Governor::new(&GovernorConfig::default());
        let err = governor
            .governed_call("llm-primary", "alice", RequestType::Chat, || async {
                Err::<(), _>(UpstreamError::status(404, "missing"))
            })
            .await
            .unwrap_err();
        assert!(matches!(err.upstream(), Some(UpstreamError::Status { status: 404, .. })));
        assert_eq!(governor.health_status().services["llm-primary"].consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_system_health_uses_storage_probe() {
        let governor = Governor::new(&GovernorConfig::default()).with_storage_probe(Arc::new(FixedProbe(0.0)));
        let health = governor.system_health();
        assert_eq!(health.score, 75.0);
        assert_eq!(health.level, HealthLevel::Good);
    }

    #[tokio::test(start_paused = true)]
    async fn test_apply_config_adds_service() {
        let governor = Governor::new(&GovernorConfig::default());
        assert!(!governor.rate_limiter().is_allowed("bib-new"));

        let mut config = GovernorConfig::default();
        config
            .services
            .insert("bib-new".to_string(), crate::config::ServiceConfig::new(4.0, 1.0));
        governor.apply_config(&config);

        assert!(governor.rate_limiter().is_allowed("bib-new"));
        assert_eq!(governor.rate_limiter_status()["bib-new"].max_tokens, 4.0);
    }
}
