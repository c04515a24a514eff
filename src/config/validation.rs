//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (rates > 0, thresholds ≥ 1, ceilings consistent)
//! - Check the metrics/admin addresses parse
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GovernorConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::{GovernorConfig, ServiceConfig};

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("service `{service}`: max_tokens must be at least 1 (got {value})")]
    MaxTokens { service: String, value: f64 },

    #[error("service `{service}`: refill_rate must be positive (got {value})")]
    RefillRate { service: String, value: f64 },

    #[error("service `{service}`: failure_threshold must be at least 1")]
    FailureThreshold { service: String },

    #[error("service `{service}`: recovery_timeout_ms must be positive")]
    RecoveryTimeout { service: String },

    #[error("admission.{field} must be at least 1")]
    ZeroCeiling { field: &'static str },

    #[error("admission.max_per_user ({per_user}) exceeds admission.max_global ({global})")]
    PerUserAboveGlobal { per_user: usize, global: usize },

    #[error("admission.starvation_threshold_ms must be below admission.queue_timeout_ms")]
    StarvationAfterTimeout,

    #[error("throttle.base_delay_ms ({base}) exceeds throttle.max_delay_ms ({max})")]
    BackoffRange { base: u64, max: u64 },

    #[error("{field}: `{value}` is not a socket address")]
    Address { field: &'static str, value: String },
}

/// Validate a parsed configuration, collecting every problem found.
pub fn validate_config(config: &GovernorConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    for (name, service) in &config.services {
        validate_service(name, service, &mut errors);
    }
    validate_service("[defaults]", &config.defaults, &mut errors);

    let admission = &config.admission;
    if admission.max_per_user == 0 {
        errors.push(ValidationError::ZeroCeiling { field: "max_per_user" });
    }
    if admission.max_global == 0 {
        errors.push(ValidationError::ZeroCeiling { field: "max_global" });
    }
    if admission.max_queued_per_user == 0 {
        errors.push(ValidationError::ZeroCeiling { field: "max_queued_per_user" });
    }
    if admission.max_per_user > admission.max_global {
        errors.push(ValidationError::PerUserAboveGlobal {
            per_user: admission.max_per_user,
            global: admission.max_global,
        });
    }
    if admission.starvation_threshold_ms >= admission.queue_timeout_ms {
        errors.push(ValidationError::StarvationAfterTimeout);
    }

    let throttle = &config.throttle;
    if throttle.base_delay_ms > throttle.max_delay_ms {
        errors.push(ValidationError::BackoffRange {
            base: throttle.base_delay_ms,
            max: throttle.max_delay_ms,
        });
    }

    if config.observability.metrics_enabled {
        check_address("observability.metrics_address", &config.observability.metrics_address, &mut errors);
    }
    if config.admin.enabled {
        check_address("admin.bind_address", &config.admin.bind_address, &mut errors);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_service(name: &str, service: &ServiceConfig, errors: &mut Vec<ValidationError>) {
    // NaN fails both comparisons, so test the accepted range.
    if !(service.max_tokens >= 1.0) {
        errors.push(ValidationError::MaxTokens {
            service: name.to_string(),
            value: service.max_tokens,
        });
    }
    if !(service.refill_rate > 0.0) || !service.refill_rate.is_finite() {
        errors.push(ValidationError::RefillRate {
            service: name.to_string(),
            value: service.refill_rate,
        });
    }
    if service.failure_threshold == 0 {
        errors.push(ValidationError::FailureThreshold { service: name.to_string() });
    }
    if service.recovery_timeout_ms == 0 {
        errors.push(ValidationError::RecoveryTimeout { service: name.to_string() });
    }
}

fn check_address(field: &'static str, value: &str, errors: &mut Vec<ValidationError>) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::Address {
            field,
            value: value.to_string(),
        });
    }
}
