//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Limiter, breaker, queue and governor produce:
//!     → tracing events (structured fields: service, user, request_id)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → Log aggregation (stdout, pretty or JSON)
//!     → Metrics endpoint (Prometheus scrape)
//!     → Admin API status endpoints (read-only snapshots)
//! ```

pub mod logging;
pub mod metrics;
