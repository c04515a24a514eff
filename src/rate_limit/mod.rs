//! Rate limiting subsystem.
//!
//! # Data Flow
//! ```text
//! Outbound call for service S:
//!     → limiter.rs (look up or create S's bucket from the service table)
//!     → bucket.rs (lazy refill, take one token)
//!     → no token: sleep ceil(1000 / refill_rate) ms, check again
//!     → operation runs; retryable failure → backoff, take a new token, retry
//! ```
//!
//! # Design Decisions
//! - One bucket per service, created on first reference, refilled lazily
//! - Waiting uses timer sleeps, never a busy loop
//! - Unknown services are refused unless the default policy is configured
//! - State is per process; separate instances do not share budgets

pub mod bucket;
pub mod limiter;

pub use bucket::RateBucket;
pub use limiter::{BucketStatus, RateLimiter};
