//! Error taxonomy for governed calls.
//!
//! # Categories
//! - Capacity (`QueueFull`, `UserConcurrencyExceeded`): rejected synchronously, never retried
//! - Temporal (`RateLimitExceeded`, `QueueTimeout`): token waits are retried inside
//!   `execute_throttled`; queue timeouts surface to the caller
//! - Availability (`ServiceUnavailable`): never retried across this boundary
//! - Upstream: the operation's own error, classified once and passed through
//!   annotated with the service id

use std::time::Duration;

use thiserror::Error;

/// Failure reported by a wrapped operation.
///
/// Integrations map their client errors into this type; the governor never
/// looks past the classification.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// The dependency answered with a non-success HTTP status.
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    /// The request did not complete in time.
    #[error("request timed out")]
    Timeout,

    /// The connection was reset or refused mid-request.
    #[error("connection reset")]
    ConnectionReset,

    /// Anything else; never retried.
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl UpstreamError {
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self::Status {
            status,
            message: message.into(),
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        let message: String = message.into();
        Self::Other(message.into())
    }

    /// 429, 5xx, timeouts and connection resets are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Timeout | Self::ConnectionReset => true,
            Self::Other(_) => false,
        }
    }
}

/// Errors raised by the governor's action methods.
#[derive(Debug, Error)]
pub enum GovernorError {
    #[error("rate limit exceeded for `{service}`, retry after {retry_after:?}")]
    RateLimitExceeded { service: String, retry_after: Duration },

    #[error("service `{service}` is unavailable (circuit open)")]
    ServiceUnavailable {
        service: String,
        retry_after: Option<Duration>,
    },

    #[error("admission queue is full ({capacity} waiting)")]
    QueueFull { capacity: usize },

    #[error("request waited {waited:?} without being admitted")]
    QueueTimeout { waited: Duration },

    #[error("user `{user}` already has {limit} requests waiting")]
    UserConcurrencyExceeded { user: String, limit: usize },

    #[error("request dropped by an administrative queue reset")]
    QueueReset,

    #[error("service `{0}` has no configured limits")]
    UnknownService(String),

    #[error("upstream `{service}` failed: {source}")]
    Upstream {
        service: String,
        #[source]
        source: UpstreamError,
    },
}

/// Coarse classification used for user-facing messages and metrics labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Capacity,
    Temporal,
    Availability,
    Upstream,
    Configuration,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Capacity => "capacity",
            ErrorKind::Temporal => "temporal",
            ErrorKind::Availability => "availability",
            ErrorKind::Upstream => "upstream",
            ErrorKind::Configuration => "configuration",
        }
    }
}

impl GovernorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::QueueFull { .. } | Self::UserConcurrencyExceeded { .. } => ErrorKind::Capacity,
            Self::RateLimitExceeded { .. } | Self::QueueTimeout { .. } | Self::QueueReset => {
                ErrorKind::Temporal
            }
            Self::ServiceUnavailable { .. } => ErrorKind::Availability,
            Self::Upstream { .. } => ErrorKind::Upstream,
            Self::UnknownService(_) => ErrorKind::Configuration,
        }
    }

    /// Message safe to show an end user.
    pub fn user_message(&self) -> &'static str {
        match self.kind() {
            ErrorKind::Capacity | ErrorKind::Temporal => "The system is busy, please retry shortly.",
            ErrorKind::Availability => "This feature is temporarily degraded, please try again later.",
            ErrorKind::Upstream | ErrorKind::Configuration => "The request could not be completed.",
        }
    }

    /// The wrapped operation's error, if this is an upstream failure.
    pub fn upstream(&self) -> Option<&UpstreamError> {
        match self {
            Self::Upstream { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Errors that the throttling retry loop and the breaker know how to handle.
pub trait CallError: Sized {
    /// Whether another attempt may succeed.
    fn is_retryable(&self) -> bool;

    /// Whether the failure says something about the dependency's health.
    /// Client errors (4xx other than 429) do not.
    fn trips_breaker(&self) -> bool {
        true
    }

    /// Convert into a governor error, annotating upstream failures with the service.
    fn into_governor_error(self, service: &str) -> GovernorError;
}

impl CallError for UpstreamError {
    fn is_retryable(&self) -> bool {
        UpstreamError::is_retryable(self)
    }

    fn trips_breaker(&self) -> bool {
        !matches!(self, UpstreamError::Status { status, .. } if *status < 500 && *status != 429)
    }

    fn into_governor_error(self, service: &str) -> GovernorError {
        GovernorError::Upstream {
            service: service.to_string(),
            source: self,
        }
    }
}

impl CallError for GovernorError {
    fn is_retryable(&self) -> bool {
        match self {
            GovernorError::RateLimitExceeded { .. } => true,
            GovernorError::Upstream { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    fn trips_breaker(&self) -> bool {
        match self {
            GovernorError::Upstream { source, .. } => CallError::trips_breaker(source),
            _ => false,
        }
    }

    fn into_governor_error(self, _service: &str) -> GovernorError {
        self
    }
}

/// Rejections produced by the admission queue itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdmissionError {
    #[error("admission queue is full ({capacity} waiting)")]
    QueueFull { capacity: usize },

    #[error("request waited {waited:?} without being admitted")]
    QueueTimeout { waited: Duration },

    #[error("user `{user}` already has {limit} requests waiting")]
    UserConcurrencyExceeded { user: String, limit: usize },

    #[error("request dropped by an administrative queue reset")]
    QueueReset,
}

impl From<AdmissionError> for GovernorError {
    fn from(err: AdmissionError) -> Self {
        match err {
            AdmissionError::QueueFull { capacity } => GovernorError::QueueFull { capacity },
            AdmissionError::QueueTimeout { waited } => GovernorError::QueueTimeout { waited },
            AdmissionError::UserConcurrencyExceeded { user, limit } => {
                GovernorError::UserConcurrencyExceeded { user, limit }
            }
            AdmissionError::QueueReset => GovernorError::QueueReset,
        }
    }
}
