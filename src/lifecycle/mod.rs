//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     Signal received → broadcast → admin server drains → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//!     SIGHUP → Reload the service table from disk
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then logging and metrics, then the governor, then listeners
//! - Queued requests are not drained; their callers see the process exit

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
pub use signals::{next_signal, SignalEvent};
