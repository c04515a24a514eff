use std::collections::BTreeMap;

use axum::{extract::State, Json};
use serde::Serialize;

use super::AdminState;
use crate::admission::QueueStatus;
use crate::governor::HealthReport;
use crate::health::AggregateHealth;
use crate::rate_limit::BucketStatus;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub health: AggregateHealth,
}

#[derive(Serialize)]
pub struct ActionResult {
    pub action: &'static str,
    pub status: &'static str,
}

impl ActionResult {
    fn done(action: &'static str) -> Json<Self> {
        Json(Self { action, status: "ok" })
    }
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        health: state.governor.system_health(),
    })
}

pub async fn get_queue(State(state): State<AdminState>) -> Json<QueueStatus> {
    Json(state.governor.queue_status())
}

pub async fn get_rate_limits(State(state): State<AdminState>) -> Json<BTreeMap<String, BucketStatus>> {
    Json(state.governor.rate_limiter_status())
}

pub async fn get_health(State(state): State<AdminState>) -> Json<HealthReport> {
    Json(state.governor.health_status())
}

pub async fn reset_queue(State(state): State<AdminState>) -> Json<ActionResult> {
    state.governor.reset_queue();
    ActionResult::done("reset_queue")
}

pub async fn reset_rate_limits(State(state): State<AdminState>) -> Json<ActionResult> {
    state.governor.reset_rate_limits();
    ActionResult::done("reset_rate_limits")
}

pub async fn reset_errors(State(state): State<AdminState>) -> Json<ActionResult> {
    state.governor.reset_error_metrics();
    ActionResult::done("reset_error_metrics")
}

pub async fn close_circuits(State(state): State<AdminState>) -> Json<ActionResult> {
    state.governor.force_close_all_circuits();
    ActionResult::done("force_close_all_circuits")
}
