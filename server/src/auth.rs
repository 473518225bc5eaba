//! Shared-key authentication middleware.

use axum::body::Body;
use axum::extract::Extension;
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use ctrans::api::SERVICE_KEY_HEADER;

use crate::State;

/// Rejects requests that do not carry the configured service key.
///
/// With no key configured the check is disabled and every request
/// passes through.
pub async fn require_service_key(
    Extension(state): Extension<State>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some(expected) = state.config.service_key.as_deref() else {
        return next.run(request).await;
    };

    match request
        .headers()
        .get(SERVICE_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
    {
        None => (StatusCode::UNAUTHORIZED, "Service key required").into_response(),
        Some(key) if key != expected => {
            (StatusCode::UNAUTHORIZED, "Invalid service key").into_response()
        }
        Some(_) => next.run(request).await,
    }
}
