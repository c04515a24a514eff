//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Call to a dependency:
//!     → circuit_breaker.rs (fail fast if the service's circuit is open)
//!     → operation runs
//!     → outcome recorded (consecutive failures, open on threshold)
//!     → On retryable failure: CallError classification, backoff.rs delay
//! ```
//!
//! # Design Decisions
//! - Circuit breaker prevents hammering a failing dependency
//! - An open circuit is never retried from inside the governor
//! - Jittered backoff prevents thundering herd

pub mod backoff;
pub mod circuit_breaker;

pub use backoff::Backoff;
pub use circuit_breaker::{CircuitState, HealthTracker, ServiceHealth, ServiceHealthStatus};
