//! Admin API.
//!
//! Bearer-token protected routes for inspecting and feeding the dispatcher.

pub mod auth;
pub mod handlers;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tower_http::{limit::RequestBodyLimitLayer, timeout::TimeoutLayer, trace::TraceLayer};

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::lifecycle::Dispatcher;

#[allow(deprecated)]
pub fn setup_admin_router(dispatcher: Arc<Dispatcher>) -> Router {
    let config = dispatcher.config();

    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/health", get(get_health))
        .route("/admin/queue", get(get_queue))
        .route("/admin/breakers", get(get_breakers))
        .route("/admin/deliveries", post(post_delivery))
        .route("/admin/deliveries/{id}", get(get_delivery))
        .route("/admin/webhooks/{id}/deliveries", get(get_webhook_history))
        .layer(middleware::from_fn_with_state(dispatcher.clone(), admin_auth_middleware))
        .with_state(dispatcher)
        .layer(RequestBodyLimitLayer::new(config.admin.max_body_bytes))
        .layer(TimeoutLayer::new(Duration::from_secs(config.admin.request_timeout_secs)))
        .layer(TraceLayer::new_for_http())
}

/// Serve the admin API on `listener` until `shutdown` resolves.
pub async fn serve<F>(dispatcher: Arc<Dispatcher>, listener: TcpListener, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    tracing::info!(address = %addr, "Admin API starting");

    axum::serve(listener, setup_admin_router(dispatcher))
        .with_graceful_shutdown(shutdown)
        .await?;

    tracing::info!("Admin API stopped");
    Ok(())
}
