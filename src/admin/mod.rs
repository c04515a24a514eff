pub mod handlers;
pub mod auth;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::config::AdminConfig;
use crate::governor::Governor;
use self::auth::admin_auth_middleware;
use self::handlers::*;

/// Shared state for admin handlers.
#[derive(Clone)]
pub struct AdminState {
    pub governor: Arc<Governor>,
    pub api_key: Arc<str>,
}

impl AdminState {
    pub fn new(governor: Arc<Governor>, config: &AdminConfig) -> Self {
        Self {
            governor,
            api_key: Arc::from(config.api_key.as_str()),
        }
    }
}

pub fn setup_admin_router(state: AdminState, request_timeout: Duration) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/queue", get(get_queue))
        .route("/admin/rate-limits", get(get_rate_limits))
        .route("/admin/health", get(get_health))
        .route("/admin/queue/reset", post(reset_queue))
        .route("/admin/rate-limits/reset", post(reset_rate_limits))
        .route("/admin/errors/reset", post(reset_errors))
        .route("/admin/circuits/close", post(close_circuits))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the admin API for `governor` on `listener` until `shutdown` resolves.
pub async fn serve_admin<S>(
    listener: TcpListener,
    governor: Arc<Governor>,
    config: &AdminConfig,
    shutdown: S,
) -> std::io::Result<()>
where
    S: Future<Output = ()> + Send + 'static,
{
    if config.api_key == "CHANGE_ME_IN_PRODUCTION" {
        tracing::warn!("Admin API is using the placeholder api_key");
    }
    tracing::info!(address = %listener.local_addr()?, "Admin API listening");

    let router = setup_admin_router(
        AdminState::new(governor, config),
        Duration::from_secs(config.request_timeout_secs),
    );
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}
