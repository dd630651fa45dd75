//! Webhook dispatcher daemon.
//!
//! # Architecture Overview
//!
//! ```text
//!   producer / admin POST
//!          │
//!          ▼
//!   ┌──────────────┐  claim (lease)  ┌──────────────┐  execute  ┌────────────────┐
//!   │ WebhookQueue │────────────────▶│   worker     │──────────▶│ CircuitBreaker │
//!   │  + JobStore  │◀────────────────│ (semaphore)  │           └───────┬────────┘
//!   └──────────────┘ complete/fail   └──────────────┘                   │
//!                                                                       ▼
//!                                                          ┌─────────────────────┐
//!                                                          │ WebhookProcessor    │
//!                                                          │ sign + POST + class │──▶ subscriber
//!                                                          └─────────────────────┘
//!
//!   Cross-cutting: config (+ hot reload), EventBus → logging/metrics,
//!   health checks, admin API, lifecycle (startup / drain / flush)
//! ```
//!
//! Usage: `webhook-dispatch [config.toml]`. Without a file, defaults plus
//! `DISPATCH_*` environment overrides are used.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::net::TcpListener;

use webhook_dispatch::admin;
use webhook_dispatch::config::{load_config, load_from_env, watcher::ConfigWatcher};
use webhook_dispatch::lifecycle::{signals::wait_for_shutdown_signal, Dispatcher, Shutdown};
use webhook_dispatch::observability::{logging::init_tracing, metrics::init_metrics};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = match &config_path {
        Some(path) => load_config(path)?,
        None => load_from_env()?,
    };

    init_tracing(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), config = ?config_path, "webhook-dispatch starting");

    if config.admin.api_key == "CHANGE_ME_IN_PRODUCTION" {
        tracing::warn!("Admin API key is the default placeholder; set DISPATCH_ADMIN_API_KEY");
    }

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let dispatcher = Arc::new(Dispatcher::start(config.clone()).await?);
    let shutdown = Arc::new(Shutdown::new());

    // Keep the watcher handle alive for the process lifetime.
    let _watcher = match &config_path {
        Some(path) => {
            let (watcher, mut updates) = ConfigWatcher::new(path);
            let handle = watcher.run()?;
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                while let Some(updated) = updates.recv().await {
                    dispatcher.apply_config(updated);
                }
            });
            Some(handle)
        }
        None => None,
    };

    let admin_task = if config.admin.enabled {
        let listener = TcpListener::bind(&config.admin.bind_address).await?;
        let mut stop = shutdown.subscribe();
        Some(tokio::spawn(admin::serve(dispatcher.clone(), listener, async move {
            let _ = stop.recv().await;
        })))
    } else {
        None
    };

    wait_for_shutdown_signal().await;

    shutdown.trigger();
    if let Some(task) = admin_task {
        match task.await {
            Ok(Err(e)) => tracing::error!(error = %e, "Admin API failed"),
            Err(e) => tracing::error!(error = %e, "Admin API task panicked"),
            Ok(Ok(())) => {}
        }
    }

    dispatcher.close().await?;
    tracing::info!("Shutdown complete");
    Ok(())
}
