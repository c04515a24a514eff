//! Request classes and queue entries.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::time::{Duration, Instant};
use uuid::Uuid;

use crate::admission::queue::AdmissionPermit;

/// Kind of work a user asked for; decides queue priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestType {
    /// Interactive chat turn.
    Chat,
    /// Research synthesis.
    Research,
    /// Document export.
    Export,
}

impl RequestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestType::Chat => "chat",
            RequestType::Research => "research",
            RequestType::Export => "export",
        }
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chat" => Ok(RequestType::Chat),
            "research" => Ok(RequestType::Research),
            "export" => Ok(RequestType::Export),
            other => Err(format!("unknown request type `{other}`")),
        }
    }
}

/// Lifecycle of a submitted request.
///
/// ```text
/// Enqueued → Admitted → Running → Completed | Failed
/// Enqueued → TimedOut
/// Enqueued → Cancelled
/// Rejected (never enqueued)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Enqueued,
    Admitted,
    Running,
    Completed,
    Failed,
    TimedOut,
    Cancelled,
    Rejected,
}

impl RequestState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestState::Enqueued => "enqueued",
            RequestState::Admitted => "admitted",
            RequestState::Running => "running",
            RequestState::Completed => "completed",
            RequestState::Failed => "failed",
            RequestState::TimedOut => "timed_out",
            RequestState::Cancelled => "cancelled",
            RequestState::Rejected => "rejected",
        }
    }
}

/// A request waiting for admission.
#[derive(Debug)]
pub(crate) struct QueuedRequest {
    pub id: Uuid,
    pub user_id: String,
    pub request_type: RequestType,
    pub priority: u8,
    pub enqueued_at: Instant,
    /// Monotonic enqueue order; breaks ties between equal instants.
    pub seq: u64,
    pub completion: oneshot::Sender<AdmissionPermit>,
}

impl QueuedRequest {
    /// Admission order key, smallest first: aged entries oldest first, then
    /// everyone else by priority (high first) and enqueue order.
    pub fn rank(&self, now: Instant, starvation_threshold: Duration) -> (u8, u8, u64) {
        if now.saturating_duration_since(self.enqueued_at) >= starvation_threshold {
            (0, 0, self.seq)
        } else {
            (1, u8::MAX - self.priority, self.seq)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(priority: u8, seq: u64, enqueued_at: Instant) -> QueuedRequest {
        let (completion, _rx) = oneshot::channel();
        QueuedRequest {
            id: Uuid::new_v4(),
            user_id: "u".to_string(),
            request_type: RequestType::Chat,
            priority,
            enqueued_at,
            seq,
            completion,
        }
    }

    #[test]
    fn test_request_type_round_trip() {
        for ty in [RequestType::Chat, RequestType::Research, RequestType::Export] {
            assert_eq!(ty.as_str().parse::<RequestType>(), Ok(ty));
        }
        assert!("batch".parse::<RequestType>().is_err());
    }

    #[test]
    fn test_rank_orders_priority_then_fifo() {
        let now = Instant::now();
        let threshold = Duration::from_secs(30);
        let low_early = entry(1, 0, now);
        let high_late = entry(3, 2, now);
        let high_early = entry(3, 1, now);

        assert!(high_early.rank(now, threshold) < high_late.rank(now, threshold));
        assert!(high_late.rank(now, threshold) < low_early.rank(now, threshold));
    }

    #[test]
    fn test_aged_entries_jump_ahead() {
        let start = Instant::now();
        let threshold = Duration::from_secs(30);
        let old_export = entry(1, 0, start);
        let new_chat = entry(3, 1, start + Duration::from_secs(31));
        let now = start + Duration::from_secs(31);

        assert!(old_export.rank(now, threshold) < new_chat.rank(now, threshold));
    }
}
