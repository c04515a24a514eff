//! Per-service rate limiter with throttled execution.

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use arc_swap::ArcSwap;
use dashmap::mapref::one::RefMut;
use dashmap::DashMap;
use serde::Serialize;
use tokio::time::Instant;

use crate::config::{ServiceTable, ThrottleConfig};
use crate::error::{CallError, GovernorError};
use crate::observability::metrics;
use crate::rate_limit::bucket::RateBucket;
use crate::resilience::backoff::Backoff;

/// Read-only view of one bucket.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BucketStatus {
    pub tokens_available: f64,
    pub max_tokens: f64,
    pub utilization_percent: f64,
}

/// One token bucket per service, created on first use.
pub struct RateLimiter {
    buckets: DashMap<String, RateBucket>,
    table: ArcSwap<ServiceTable>,
    throttle: ThrottleConfig,
    backoff: Backoff,
}

impl RateLimiter {
    pub fn new(table: ServiceTable, throttle: ThrottleConfig) -> Self {
        Self {
            buckets: DashMap::new(),
            table: ArcSwap::from_pointee(table),
            backoff: Backoff::from_config(&throttle),
            throttle,
        }
    }

    /// Bucket for `service`, created full on first reference.
    /// `None` when the service is unknown and the policy rejects it.
    fn bucket(&self, service: &str) -> Option<RefMut<'_, String, RateBucket>> {
        if let Some(bucket) = self.buckets.get_mut(service) {
            return Some(bucket);
        }

        let table = self.table.load();
        let limits = table.get(service)?;
        if !table.is_configured(service) {
            tracing::warn!(service = %service, "No limits configured, applying defaults");
        }
        Some(
            self.buckets
                .entry(service.to_string())
                .or_insert_with(|| RateBucket::new(limits, Instant::now())),
        )
    }

    /// Whether calls to `service` are accepted under the unknown-service policy.
    pub fn is_allowed(&self, service: &str) -> bool {
        self.table.load().get(service).is_some()
    }

    /// Take a token without waiting.
    pub fn try_acquire(&self, service: &str) -> bool {
        match self.bucket(service) {
            Some(mut bucket) => bucket.try_consume(Instant::now()),
            None => false,
        }
    }

    /// Wait until a token is available.
    ///
    /// Sleeps `ceil(1000 / refill_rate)` ms between checks.
    pub async fn acquire_blocking(&self, service: &str) -> Result<(), GovernorError> {
        self.acquire(service, None).await
    }

    /// Wait at most `max_wait` for a token.
    pub async fn acquire_within(&self, service: &str, max_wait: Duration) -> Result<(), GovernorError> {
        self.acquire(service, Some(Instant::now() + max_wait)).await
    }

    async fn acquire(&self, service: &str, deadline: Option<Instant>) -> Result<(), GovernorError> {
        loop {
            // The shard guard must not live across the sleep.
            let (poll, retry_after) = {
                let Some(mut bucket) = self.bucket(service) else {
                    return Err(GovernorError::UnknownService(service.to_string()));
                };
                let now = Instant::now();
                if bucket.try_consume(now) {
                    return Ok(());
                }
                (bucket.poll_interval(), bucket.time_until_token(now))
            };

            let wait = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        metrics::record_rate_limited(service);
                        tracing::warn!(service = %service, retry_after = ?retry_after, "Rate limit wait exceeded");
                        return Err(GovernorError::RateLimitExceeded {
                            service: service.to_string(),
                            retry_after,
                        });
                    }
                    poll.min(deadline - now)
                }
                None => poll,
            };

            tracing::trace!(service = %service, wait = ?wait, "Waiting for rate limit token");
            tokio::time::sleep(wait).await;
        }
    }

    /// Run `operation` under the rate limit, retrying retryable failures.
    ///
    /// Each attempt acquires a fresh token. Retryable failures (429, 5xx,
    /// timeouts, connection resets, exhausted token waits) back off
    /// exponentially; anything else, or the last failure once `max_retries`
    /// retries are spent, is returned annotated with `service`.
    pub async fn execute_throttled<T, E, F, Fut>(
        &self,
        service: &str,
        max_retries: u32,
        mut operation: F,
    ) -> Result<T, GovernorError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: CallError,
    {
        let mut retry = 0;
        loop {
            let result = match self.acquire_within(service, self.throttle.acquire_timeout()).await {
                Ok(()) => operation().await.map_err(|e| e.into_governor_error(service)),
                Err(e) => Err(e),
            };

            let err = match result {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !err.is_retryable() || retry >= max_retries {
                return Err(err);
            }

            let delay = self.backoff.delay(retry);
            retry += 1;
            metrics::record_retry(service);
            tracing::info!(service = %service, attempt = retry, delay = ?delay, error = %err, "Retrying call");
            tokio::time::sleep(delay).await;
        }
    }

    /// Configured retry budget for governed calls.
    pub fn max_retries(&self) -> u32 {
        self.throttle.max_retries
    }

    /// Snapshot of every configured or used service.
    pub fn status(&self) -> BTreeMap<String, BucketStatus> {
        let now = Instant::now();
        let mut status: BTreeMap<String, BucketStatus> = self
            .table
            .load()
            .services
            .iter()
            .map(|(name, limits)| {
                let bucket = RateBucket::new(limits, now);
                (name.clone(), Self::bucket_status(&bucket, now))
            })
            .collect();

        for entry in self.buckets.iter() {
            status.insert(entry.key().clone(), Self::bucket_status(entry.value(), now));
        }
        status
    }

    fn bucket_status(bucket: &RateBucket, now: Instant) -> BucketStatus {
        BucketStatus {
            tokens_available: bucket.available(now),
            max_tokens: bucket.max_tokens(),
            utilization_percent: bucket.utilization_percent(now),
        }
    }

    /// Mean utilisation across tracked buckets, 0 when nothing was used yet.
    pub fn mean_utilization(&self) -> f64 {
        let now = Instant::now();
        let (sum, count) = self
            .buckets
            .iter()
            .fold((0.0, 0usize), |(sum, count), entry| {
                (sum + entry.value().utilization_percent(now), count + 1)
            });
        if count == 0 {
            0.0
        } else {
            sum / count as f64
        }
    }

    /// Forget every bucket; they come back full on next use.
    pub fn reset(&self) {
        self.buckets.clear();
        tracing::info!("Rate limit buckets reset");
    }

    /// Swap in a new service table. Buckets adopt their new limits; buckets for
    /// services that are no longer allowed are dropped.
    pub fn apply(&self, table: ServiceTable) {
        let now = Instant::now();
        self.buckets.retain(|service, bucket| match table.get(service) {
            Some(limits) => {
                bucket.reconfigure(limits, now);
                true
            }
            None => false,
        });
        self.table.store(std::sync::Arc::new(table));
        tracing::info!("Rate limit table updated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ServiceConfig, UnknownServicePolicy};
    use crate::error::UpstreamError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn limiter(max_tokens: f64, refill_rate: f64) -> RateLimiter {
        let mut table = ServiceTable::default();
        table
            .services
            .insert("bib-a".to_string(), ServiceConfig::new(max_tokens, refill_rate));
        RateLimiter::new(table, ThrottleConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_try_acquire_respects_bucket() {
        let limiter = limiter(10.0, 2.0);
        for _ in 0..10 {
            assert!(limiter.try_acquire("bib-a"));
        }
        assert!(!limiter.try_acquire("bib-a"));

        tokio::time::advance(Duration::from_millis(500)).await;
        assert!(limiter.try_acquire("bib-a"));
        assert!(!limiter.try_acquire("bib-a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_blocking_sleeps_poll_interval() {
        let limiter = limiter(1.0, 3.0);
        limiter.acquire_blocking("bib-a").await.unwrap();

        let start = Instant::now();
        limiter.acquire_blocking("bib-a").await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(334));
        assert!(start.elapsed() < Duration::from_millis(340));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_service_rejected_by_default() {
        let limiter = limiter(1.0, 1.0);
        assert!(!limiter.try_acquire("mystery"));
        let err = limiter.acquire_blocking("mystery").await.unwrap_err();
        assert!(matches!(err, GovernorError::UnknownService(ref s) if s == "mystery"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_service_with_default_policy() {
        let table = ServiceTable {
            unknown_service: UnknownServicePolicy::Default,
            defaults: ServiceConfig::new(2.0, 1.0),
            ..ServiceTable::default()
        };
        let limiter = RateLimiter::new(table, ThrottleConfig::default());
        assert!(limiter.try_acquire("mystery"));
        assert!(limiter.try_acquire("mystery"));
        assert!(!limiter.try_acquire("mystery"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_within_times_out() {
        let limiter = limiter(1.0, 0.1);
        assert!(limiter.try_acquire("bib-a"));
        let err = limiter
            .acquire_within("bib-a", Duration::from_secs(2))
            .await
            .unwrap_err();
        match err {
            GovernorError::RateLimitExceeded { service, retry_after } => {
                assert_eq!(service, "bib-a");
                assert!(retry_after > Duration::from_secs(7));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_within_tiny_refill_rate() {
        let limiter = limiter(1.0, 1e-20);
        assert!(limiter.try_acquire("bib-a"));

        let start = Instant::now();
        let err = limiter
            .acquire_within("bib-a", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(start.elapsed() >= Duration::from_secs(1));
        assert!(matches!(
            err,
            GovernorError::RateLimitExceeded { retry_after, .. } if retry_after == Duration::MAX
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_throttled_retries_retryable_errors() {
        let limiter = limiter(10.0, 10.0);
        let counter = AtomicU32::new(0);
        let calls = &counter;

        let start = Instant::now();
        let result = limiter
            .execute_throttled("bib-a", 3, move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(UpstreamError::status(503, "busy"))
                } else {
                    Ok("done")
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 1s + 2s of backoff, each with up to 10% jitter.
        assert!(start.elapsed() >= Duration::from_secs(3));
        assert!(start.elapsed() < Duration::from_millis(3400));
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_throttled_gives_up_after_max_retries() {
        let limiter = limiter(10.0, 10.0);
        let counter = AtomicU32::new(0);
        let calls = &counter;

        let err = limiter
            .execute_throttled("bib-a", 2, move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(UpstreamError::Timeout)
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(matches!(err, GovernorError::Upstream { ref service, source: UpstreamError::Timeout } if service == "bib-a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_throttled_does_not_retry_client_errors() {
        let limiter = limiter(10.0, 10.0);
        let counter = AtomicU32::new(0);
        let calls = &counter;

        let err = limiter
            .execute_throttled("bib-a", 3, move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(UpstreamError::status(404, "not found"))
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(err.upstream().map(|e| e.to_string()), Some("HTTP 404: not found".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_and_reset() {
        let limiter = limiter(4.0, 1.0);
        assert_eq!(limiter.status()["bib-a"].utilization_percent, 0.0);

        limiter.try_acquire("bib-a");
        limiter.try_acquire("bib-a");
        let status = limiter.status();
        assert_eq!(status["bib-a"].tokens_available, 2.0);
        assert_eq!(status["bib-a"].utilization_percent, 50.0);
        assert_eq!(limiter.mean_utilization(), 50.0);

        limiter.reset();
        assert_eq!(limiter.status()["bib-a"].tokens_available, 4.0);
        assert_eq!(limiter.mean_utilization(), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_apply_reconfigures_buckets() {
        let limiter = limiter(10.0, 1.0);
        limiter.try_acquire("bib-a");

        let mut table = ServiceTable::default();
        table
            .services
            .insert("bib-a".to_string(), ServiceConfig::new(3.0, 1.0));
        limiter.apply(table);

        assert_eq!(limiter.status()["bib-a"].max_tokens, 3.0);
        assert_eq!(limiter.status()["bib-a"].tokens_available, 3.0);

        limiter.apply(ServiceTable::default());
        assert!(!limiter.try_acquire("bib-a"));
        assert!(limiter.status().is_empty());
    }
}
