//! Service governor: rate limiting, circuit breaking and admission control
//! for outbound calls to external services.
//!
//! Applications embed a single [`Governor`] and route every outbound call
//! through [`Governor::governed_call`]:
//!
//! ```no_run
//! use service_governor::{Governor, GovernorConfig, RequestType, UpstreamError};
//!
//! # async fn run() -> Result<(), service_governor::GovernorError> {
//! let governor = Governor::new(&GovernorConfig::default());
//! let answer = governor
//!     .governed_call("llm-primary", "user-42", RequestType::Chat, || async {
//!         Ok::<_, UpstreamError>("completion")
//!     })
//!     .await?;
//! # let _ = answer;
//! # Ok(())
//! # }
//! ```
//!
//! The `service-governor` binary is an operator shell around a governor with
//! no integrations of its own; [`admin::serve_admin`] exposes the same admin
//! API from inside an embedding application.

pub mod admin;
pub mod admission;
pub mod config;
pub mod error;
pub mod governor;
pub mod health;
pub mod lifecycle;
pub mod observability;
pub mod rate_limit;
pub mod resilience;

pub use admission::RequestType;
pub use config::GovernorConfig;
pub use error::{GovernorError, UpstreamError};
pub use governor::Governor;
pub use lifecycle::Shutdown;
