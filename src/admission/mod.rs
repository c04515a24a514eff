//! Admission control subsystem.
//!
//! # Data Flow
//! ```text
//! submit(user, type, op):
//!     → capacity for user and system? → run now
//!     → queue full?                   → QueueFull
//!     → user has too many waiting?    → UserConcurrencyExceeded
//!     → enqueue, wait for a permit (bounded by queue timeout)
//!     → permit dropped on completion → next waiter admitted
//! ```
//!
//! # Design Decisions
//! - Queue and counters share one lock so admission decisions are atomic
//! - Permits are RAII guards; every exit path releases exactly once
//! - Waiting longer than the starvation threshold outranks priority
//! - Permits are delivered outside the lock

pub mod queue;
pub mod request;

pub use queue::{AdmissionPermit, AdmissionQueue, QueueStatus};
pub use request::{RequestState, RequestType};
