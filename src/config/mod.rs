//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → GovernorConfig (validated, immutable)
//!     → Governor::new builds limiter, breaker and queue from it
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → Governor::apply_config swaps the service table
//! ```
//!
//! # Design Decisions
//! - Every service id the application calls should have a typed entry
//! - Unknown services are rejected unless the default policy is chosen explicitly
//! - All fields have defaults to allow minimal configs
//! - Only the service table hot-reloads; admission ceilings need a restart

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    AdminConfig, AdmissionConfig, GovernorConfig, LogFormat, ObservabilityConfig, PriorityConfig,
    ServiceConfig, ServiceTable, ThrottleConfig, UnknownServicePolicy,
};
