//! Health reporting subsystem.
//!
//! # Data Flow
//! ```text
//! Per service:
//!     circuit breaker record (state, last error, consecutive failures)
//!     → score.rs band → 0-100
//!
//! System-wide:
//!     queue depth + mean breaker score + storage probe + limiter utilisation
//!     → score.rs weighted average → excellent / good / fair / poor / critical
//! ```
//!
//! # Design Decisions
//! - Scores are computed on read; nothing here mutates breaker state
//! - Storage health comes from a collaborator through `HealthProbe`

pub mod score;

pub use score::{AggregateHealth, HealthInputs, HealthLevel, HealthProbe};
