//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the governor.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::admission::RequestType;

/// Root configuration for the service governor.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GovernorConfig {
    /// Per-service limits keyed by service id (e.g. "llm-primary").
    pub services: BTreeMap<String, ServiceConfig>,

    /// Limits applied to unconfigured services when `unknown_service = "default"`.
    pub defaults: ServiceConfig,

    /// What to do with a service id that has no entry in `services`.
    pub unknown_service: UnknownServicePolicy,

    /// Concurrency ceilings and queueing behaviour.
    pub admission: AdmissionConfig,

    /// Retry and backoff behaviour of throttled calls.
    pub throttle: ThrottleConfig,

    /// Logging and metrics settings.
    pub observability: ObservabilityConfig,

    /// Admin API settings.
    pub admin: AdminConfig,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            services: default_service_table(),
            defaults: ServiceConfig::default(),
            unknown_service: UnknownServicePolicy::default(),
            admission: AdmissionConfig::default(),
            throttle: ThrottleConfig::default(),
            observability: ObservabilityConfig::default(),
            admin: AdminConfig::default(),
        }
    }
}

impl GovernorConfig {
    /// The hot-reloadable part of the configuration.
    pub fn service_table(&self) -> ServiceTable {
        ServiceTable {
            services: self.services.clone(),
            defaults: self.defaults.clone(),
            unknown_service: self.unknown_service,
        }
    }
}

/// Per-service limits plus the policy for services missing from the table.
#[derive(Debug, Clone, Default)]
pub struct ServiceTable {
    pub services: BTreeMap<String, ServiceConfig>,
    pub defaults: ServiceConfig,
    pub unknown_service: UnknownServicePolicy,
}

impl ServiceTable {
    pub fn get(&self, service_id: &str) -> Option<&ServiceConfig> {
        match self.services.get(service_id) {
            Some(limits) => Some(limits),
            None if self.unknown_service == UnknownServicePolicy::Default => Some(&self.defaults),
            None => None,
        }
    }

    pub fn is_configured(&self, service_id: &str) -> bool {
        self.services.contains_key(service_id)
    }
}

/// Limits for one external dependency.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Bucket capacity (burst size).
    pub max_tokens: f64,

    /// Tokens added per second.
    pub refill_rate: f64,

    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,

    /// Time the circuit stays open before a probe is allowed, in milliseconds.
    pub recovery_timeout_ms: u64,
}

impl ServiceConfig {
    pub fn new(max_tokens: f64, refill_rate: f64) -> Self {
        Self {
            max_tokens,
            refill_rate,
            ..Self::default()
        }
    }

    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_millis(self.recovery_timeout_ms)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            max_tokens: 10.0,
            refill_rate: 1.0,
            failure_threshold: 5,
            recovery_timeout_ms: 30_000,
        }
    }
}

/// The published limits of the dependencies the application talks to.
fn default_service_table() -> BTreeMap<String, ServiceConfig> {
    let mut services = BTreeMap::new();
    // Completion providers: 60 rpm primary, 30 rpm fallback.
    services.insert("llm-primary".to_string(), ServiceConfig::new(10.0, 1.0));
    services.insert("llm-secondary".to_string(), ServiceConfig::new(5.0, 0.5));
    // Bibliographic search providers.
    services.insert("bib-crossref".to_string(), ServiceConfig::new(50.0, 50.0));
    services.insert("bib-openalex".to_string(), ServiceConfig::new(10.0, 10.0));
    services.insert("bib-semantic-scholar".to_string(), ServiceConfig::new(1.0, 1.0));
    services.insert("bib-pubmed".to_string(), ServiceConfig::new(3.0, 3.0));
    // Document rendering jobs.
    services.insert("pdf-render".to_string(), ServiceConfig::new(5.0, 2.0));
    services
}

/// Policy for service ids missing from the service table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownServicePolicy {
    /// Refuse the call with `UnknownService`.
    #[default]
    Reject,
    /// Apply the `[defaults]` limits.
    Default,
}

/// Admission queue configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AdmissionConfig {
    /// Maximum concurrent operations for a single user.
    pub max_per_user: usize,

    /// Maximum concurrent operations across all users.
    pub max_global: usize,

    /// Maximum number of waiting requests.
    pub queue_max_size: usize,

    /// Maximum number of waiting requests for a single user.
    pub max_queued_per_user: usize,

    /// How long a request may wait for admission, in milliseconds.
    pub queue_timeout_ms: u64,

    /// Wait after which a request is admitted ahead of higher priorities, in milliseconds.
    pub starvation_threshold_ms: u64,

    /// Priority per request type (higher is admitted first).
    pub priorities: PriorityConfig,
}

impl AdmissionConfig {
    pub fn queue_timeout(&self) -> Duration {
        Duration::from_millis(self.queue_timeout_ms)
    }

    pub fn starvation_threshold(&self) -> Duration {
        Duration::from_millis(self.starvation_threshold_ms)
    }
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_per_user: 2,
            max_global: 20,
            queue_max_size: 100,
            max_queued_per_user: 20,
            queue_timeout_ms: 60_000,
            starvation_threshold_ms: 30_000,
            priorities: PriorityConfig::default(),
        }
    }
}

/// Priority assigned to each request type.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct PriorityConfig {
    pub chat: u8,
    pub research: u8,
    pub export: u8,
}

impl PriorityConfig {
    pub fn priority_of(&self, request_type: RequestType) -> u8 {
        match request_type {
            RequestType::Chat => self.chat,
            RequestType::Research => self.research,
            RequestType::Export => self.export,
        }
    }
}

impl Default for PriorityConfig {
    fn default() -> Self {
        Self {
            chat: 3,
            research: 2,
            export: 1,
        }
    }
}

/// Retry configuration for throttled calls.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ThrottleConfig {
    /// Maximum number of retries after the first attempt.
    pub max_retries: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,

    /// Longest a single attempt waits for a token, in milliseconds.
    pub acquire_timeout_ms: u64,
}

impl ThrottleConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 10_000,
            acquire_timeout_ms: 30_000,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Human-readable or JSON log lines.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,

    /// Request timeout for admin calls in seconds.
    pub request_timeout_secs: u64,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
            request_timeout_secs: 10,
        }
    }
}
