use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header::AUTHORIZATION, Request, StatusCode},
    middleware::Next,
    response::Response,
};

use crate::lifecycle::Dispatcher;

/// Require `Authorization: Bearer <admin.api_key>`. The key follows config reloads.
pub async fn admin_auth_middleware(
    State(dispatcher): State<Arc<Dispatcher>>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let config = dispatcher.config();

    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match token {
        Some(token) if !config.admin.api_key.is_empty() && token == config.admin.api_key => {
            Ok(next.run(request).await)
        }
        _ => {
            tracing::warn!(path = %request.uri().path(), "Rejected unauthenticated admin request");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}
