//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use service_governor::config::{GovernorConfig, ServiceConfig};
use service_governor::{Governor, UpstreamError};

/// Default configuration plus one extra service.
pub fn config_with_service(name: &str, max_tokens: f64, refill_rate: f64) -> GovernorConfig {
    let mut config = GovernorConfig::default();
    config
        .services
        .insert(name.to_string(), ServiceConfig::new(max_tokens, refill_rate));
    config
}

pub fn governor(config: &GovernorConfig) -> Arc<Governor> {
    Arc::new(Governor::new(config))
}

/// A programmable upstream: fails its first `failures` calls with `status`,
/// then succeeds with the call number.
pub struct ScriptedUpstream {
    calls: AtomicU32,
    failures: u32,
    status: u16,
}

impl ScriptedUpstream {
    pub fn failing(failures: u32, status: u16) -> Self {
        Self {
            calls: AtomicU32::new(0),
            failures,
            status,
        }
    }

    pub fn healthy() -> Self {
        Self::failing(0, 200)
    }

    pub async fn call(&self) -> Result<u32, UpstreamError> {
        let count = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if count <= self.failures {
            Err(UpstreamError::status(self.status, format!("scripted failure {count}")))
        } else {
            Ok(count)
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}
