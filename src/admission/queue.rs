//! Priority admission queue with per-user and global concurrency ceilings.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tokio::sync::oneshot;
use tokio::time::Instant;
use uuid::Uuid;

use crate::admission::request::{QueuedRequest, RequestState, RequestType};
use crate::config::AdmissionConfig;
use crate::error::AdmissionError;
use crate::observability::metrics;

/// Active operation counts.
///
/// `global` equals the sum of `per_user` whenever the lock is released.
#[derive(Debug, Default)]
struct ConcurrencyCounters {
    per_user: HashMap<String, usize>,
    global: usize,
    /// Bumped by an administrative reset; permits from older generations no
    /// longer decrement.
    generation: u64,
}

impl ConcurrencyCounters {
    fn user_active(&self, user_id: &str) -> usize {
        self.per_user.get(user_id).copied().unwrap_or(0)
    }

    fn user_has_capacity(&self, user_id: &str, config: &AdmissionConfig) -> bool {
        self.user_active(user_id) < config.max_per_user
    }

    fn has_capacity(&self, user_id: &str, config: &AdmissionConfig) -> bool {
        self.global < config.max_global && self.user_has_capacity(user_id, config)
    }

    fn increment(&mut self, user_id: &str) {
        *self.per_user.entry(user_id.to_string()).or_insert(0) += 1;
        self.global += 1;
    }

    fn decrement(&mut self, user_id: &str) {
        if let Some(count) = self.per_user.get_mut(user_id) {
            *count -= 1;
            if *count == 0 {
                self.per_user.remove(user_id);
            }
            self.global -= 1;
        }
    }
}

#[derive(Debug, Default)]
struct QueueState {
    waiting: Vec<QueuedRequest>,
    counters: ConcurrencyCounters,
    next_seq: u64,
}

impl QueueState {
    /// Admit waiting requests while global capacity remains, best ranked
    /// first among those whose user is under the per-user ceiling.
    fn admit_ready(&mut self, config: &AdmissionConfig, now: Instant) -> Vec<QueuedRequest> {
        let starvation_threshold = config.starvation_threshold();
        let mut admitted = Vec::new();

        while self.counters.global < config.max_global {
            let best = self
                .waiting
                .iter()
                .enumerate()
                .filter(|(_, request)| self.counters.user_has_capacity(&request.user_id, config))
                .min_by_key(|(_, request)| request.rank(now, starvation_threshold))
                .map(|(index, _)| index);

            let Some(index) = best else { break };
            let request = self.waiting.remove(index);
            self.counters.increment(&request.user_id);
            admitted.push(request);
        }
        admitted
    }

    fn remove(&mut self, request_id: Uuid) -> Option<QueuedRequest> {
        let index = self.waiting.iter().position(|request| request.id == request_id)?;
        Some(self.waiting.remove(index))
    }

    fn publish(&self) {
        metrics::record_queue(self.waiting.len(), self.counters.global);
    }
}

struct Shared {
    config: AdmissionConfig,
    state: Mutex<QueueState>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().expect("admission queue mutex poisoned")
    }

    /// Return a finished permit's slot and hand freed capacity to waiters.
    fn release(self: &Arc<Self>, user_id: &str, generation: u64) {
        let (admitted, current) = {
            let mut state = self.lock();
            if state.counters.generation == generation {
                state.counters.decrement(user_id);
            }
            let admitted = state.admit_ready(&self.config, Instant::now());
            state.publish();
            (admitted, state.counters.generation)
        };
        self.hand_over(admitted, current);
    }

    /// Deliver permits outside the lock. A waiter that already left drops
    /// the permit, which releases the slot again.
    fn hand_over(self: &Arc<Self>, admitted: Vec<QueuedRequest>, generation: u64) {
        let now = Instant::now();
        for request in admitted {
            tracing::debug!(
                request_id = %request.id,
                user_id = %request.user_id,
                request_type = %request.request_type,
                waited = ?now.saturating_duration_since(request.enqueued_at),
                state = RequestState::Admitted.as_str(),
                "Request admitted from queue"
            );
            metrics::record_admission("queued");
            let permit = AdmissionPermit {
                shared: Arc::clone(self),
                user_id: request.user_id,
                request_id: request.id,
                generation,
            };
            if let Err(permit) = request.completion.send(permit) {
                drop(permit);
            }
        }
    }

    /// Remove a waiting request. False if it is no longer queued.
    fn withdraw(&self, request_id: Uuid) -> bool {
        let mut state = self.lock();
        let removed = state.remove(request_id).is_some();
        if removed {
            state.publish();
        }
        removed
    }
}

/// Proof of admission. Dropping it frees the slot exactly once.
pub struct AdmissionPermit {
    shared: Arc<Shared>,
    user_id: String,
    request_id: Uuid,
    generation: u64,
}

impl AdmissionPermit {
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }
}

impl std::fmt::Debug for AdmissionPermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionPermit")
            .field("user_id", &self.user_id)
            .field("request_id", &self.request_id)
            .finish()
    }
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        self.shared.release(&self.user_id, self.generation);
    }
}

/// Removes the entry from the queue if the waiting caller goes away.
struct WaitTicket<'a> {
    shared: &'a Shared,
    request_id: Uuid,
    armed: bool,
}

impl WaitTicket<'_> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for WaitTicket<'_> {
    fn drop(&mut self) {
        if self.armed && self.shared.withdraw(self.request_id) {
            metrics::record_admission("cancelled");
            tracing::debug!(
                request_id = %self.request_id,
                state = RequestState::Cancelled.as_str(),
                "Queued request abandoned"
            );
        }
    }
}

/// Read-only view of the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueStatus {
    pub queue_size: usize,
    pub global_active_count: usize,
    pub per_user_active_counts: BTreeMap<String, usize>,
}

/// Bounds concurrent operations per user and globally, queueing the excess.
#[derive(Clone)]
pub struct AdmissionQueue {
    shared: Arc<Shared>,
}

impl AdmissionQueue {
    pub fn new(config: AdmissionConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                state: Mutex::new(QueueState::default()),
            }),
        }
    }

    pub fn config(&self) -> &AdmissionConfig {
        &self.shared.config
    }

    /// Run `operation` once admitted.
    ///
    /// Runs immediately when the user and the system both have capacity.
    /// Otherwise waits in the queue until admitted or the queue timeout
    /// passes. Dropping the returned future at any point gives back the
    /// queue slot or concurrency slot it holds.
    pub async fn submit<T, E, F, Fut>(
        &self,
        user_id: &str,
        request_type: RequestType,
        operation: F,
    ) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<AdmissionError>,
    {
        let permit = self.admit(user_id, request_type).await?;
        tracing::trace!(
            request_id = %permit.request_id(),
            user_id = %user_id,
            state = RequestState::Running.as_str(),
            "Running admitted request"
        );

        let result = operation().await;

        let state = if result.is_ok() {
            RequestState::Completed
        } else {
            RequestState::Failed
        };
        tracing::trace!(request_id = %permit.request_id(), state = state.as_str(), "Request finished");
        drop(permit);
        result
    }

    /// Wait for a concurrency slot.
    pub async fn admit(&self, user_id: &str, request_type: RequestType) -> Result<AdmissionPermit, AdmissionError> {
        let config = &self.shared.config;
        let request_id = Uuid::new_v4();

        let mut completion = {
            let mut state = self.shared.lock();

            if state.counters.has_capacity(user_id, config) {
                state.counters.increment(user_id);
                let generation = state.counters.generation;
                state.publish();
                drop(state);

                metrics::record_admission("immediate");
                return Ok(AdmissionPermit {
                    shared: Arc::clone(&self.shared),
                    user_id: user_id.to_string(),
                    request_id,
                    generation,
                });
            }

            if state.waiting.len() >= config.queue_max_size {
                metrics::record_admission("queue_full");
                tracing::warn!(
                    user_id = %user_id,
                    request_type = %request_type,
                    queue_size = state.waiting.len(),
                    state = RequestState::Rejected.as_str(),
                    "Admission queue full"
                );
                return Err(AdmissionError::QueueFull {
                    capacity: config.queue_max_size,
                });
            }

            let queued_for_user = state
                .waiting
                .iter()
                .filter(|request| request.user_id == user_id)
                .count();
            if queued_for_user >= config.max_queued_per_user {
                metrics::record_admission("user_limit");
                tracing::warn!(
                    user_id = %user_id,
                    queued = queued_for_user,
                    state = RequestState::Rejected.as_str(),
                    "User has too many queued requests"
                );
                return Err(AdmissionError::UserConcurrencyExceeded {
                    user: user_id.to_string(),
                    limit: config.max_queued_per_user,
                });
            }

            let (tx, rx) = oneshot::channel();
            let seq = state.next_seq;
            state.next_seq += 1;
            state.waiting.push(QueuedRequest {
                id: request_id,
                user_id: user_id.to_string(),
                request_type,
                priority: config.priorities.priority_of(request_type),
                enqueued_at: Instant::now(),
                seq,
                completion: tx,
            });
            state.publish();

            tracing::debug!(
                request_id = %request_id,
                user_id = %user_id,
                request_type = %request_type,
                position = state.waiting.len(),
                state = RequestState::Enqueued.as_str(),
                "Request queued"
            );
            rx
        };

        let mut ticket = WaitTicket {
            shared: &self.shared,
            request_id,
            armed: true,
        };
        let enqueued_at = Instant::now();

        match tokio::time::timeout(config.queue_timeout(), &mut completion).await {
            Ok(Ok(permit)) => {
                ticket.disarm();
                Ok(permit)
            }
            Ok(Err(_)) => {
                ticket.disarm();
                Err(AdmissionError::QueueReset)
            }
            Err(_) => {
                ticket.disarm();
                if self.shared.withdraw(request_id) {
                    let waited = enqueued_at.elapsed();
                    metrics::record_admission("timeout");
                    tracing::warn!(
                        request_id = %request_id,
                        user_id = %user_id,
                        waited = ?waited,
                        state = RequestState::TimedOut.as_str(),
                        "Queued request timed out"
                    );
                    return Err(AdmissionError::QueueTimeout { waited });
                }
                // Admitted while the timer fired; the permit is already in the channel.
                completion.await.map_err(|_| AdmissionError::QueueReset)
            }
        }
    }

    pub fn status(&self) -> QueueStatus {
        let state = self.shared.lock();
        QueueStatus {
            queue_size: state.waiting.len(),
            global_active_count: state.counters.global,
            per_user_active_counts: state
                .counters
                .per_user
                .iter()
                .map(|(user, count)| (user.clone(), *count))
                .collect(),
        }
    }

    /// Drop every waiting request and restart the counters.
    ///
    /// Waiters receive `QueueReset`. Operations already running keep going
    /// but no longer count against the ceilings.
    pub fn reset(&self) {
        let dropped = {
            let mut state = self.shared.lock();
            let dropped = std::mem::take(&mut state.waiting);
            let generation = state.counters.generation + 1;
            state.counters = ConcurrencyCounters {
                generation,
                ..ConcurrencyCounters::default()
            };
            state.publish();
            dropped
        };
        tracing::warn!(dropped = dropped.len(), "Admission queue reset");
    }
}
