//! Service governor daemon.
//!
//! The daemon is the operator shell around a [`Governor`]: it loads and hot
//! reloads configuration, exports metrics and serves the admin API. It has no
//! integrations of its own, so its governor only sees traffic when outbound
//! clients are compiled into it. Applications that make the outbound calls
//! embed the library instead and serve the same admin API over their own
//! governor with `admin::serve_admin`.
//!
//! # Architecture Overview
//!
//! ```text
//!   outbound call ──▶ ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//!                     │  admission   │──▶│  rate_limit  │──▶│  resilience  │──▶ external service
//!                     │    queue     │   │ token bucket │   │   breaker    │
//!                     └──────────────┘   └──────────────┘   └──────────────┘
//!                            ▲                   ▲                  ▲
//!                            └──────── governor (status, resets) ───┘
//!                                              ▲
//!   operator ──▶ admin API (axum, bearer) ─────┘      config watcher / SIGHUP ──▶ apply_config
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;

use service_governor::admin::serve_admin;
use service_governor::config::watcher::{self, ConfigWatcher};
use service_governor::config::{load_config, GovernorConfig};
use service_governor::lifecycle::{next_signal, SignalEvent, Shutdown};
use service_governor::observability::{logging, metrics};
use service_governor::Governor;

#[derive(Parser)]
#[command(name = "service-governor")]
#[command(about = "Rate limiting, circuit breaking and admission control for outbound calls", long_about = None)]
struct Args {
    /// Path to the TOML configuration file. Built-in defaults when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => GovernorConfig::default(),
    };

    logging::init_logging(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "service-governor starting");
    tracing::info!(
        services = config.services.len(),
        max_per_user = config.admission.max_per_user,
        max_global = config.admission.max_global,
        queue_max_size = config.admission.queue_max_size,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let governor = Arc::new(Governor::new(&config));
    let shutdown = Shutdown::new();
    let mut shutdown_rx = shutdown.subscribe();

    // Hot reload; the watcher stops when dropped.
    let _watcher = match &args.config {
        Some(path) => {
            let (watcher, mut updates) = ConfigWatcher::new(path);
            let watcher = watcher.run()?;
            let governor = Arc::clone(&governor);
            tokio::spawn(async move {
                while let Some(new_config) = updates.recv().await {
                    governor.apply_config(&new_config);
                }
            });
            Some(watcher)
        }
        None => None,
    };

    {
        let governor = Arc::clone(&governor);
        let shutdown = shutdown.clone();
        let path = args.config.clone();
        tokio::spawn(async move {
            loop {
                match next_signal().await {
                    Ok(SignalEvent::Shutdown) => {
                        tracing::info!("Shutdown signal received");
                        shutdown.trigger();
                        break;
                    }
                    Ok(SignalEvent::Reload) => match &path {
                        Some(path) => {
                            if let Some(new_config) = watcher::reload(path) {
                                governor.apply_config(&new_config);
                            }
                        }
                        None => tracing::warn!("Reload requested but no config file was given"),
                    },
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to listen for signals");
                        shutdown.trigger();
                        break;
                    }
                }
            }
        });
    }

    if config.admin.enabled {
        let listener = TcpListener::bind(&config.admin.bind_address).await?;
        serve_admin(listener, Arc::clone(&governor), &config.admin, async move {
            let _ = shutdown_rx.recv().await;
        })
        .await?;
    } else {
        let _ = shutdown_rx.recv().await;
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
