//! Shared-secret authentication.

use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::error::ApiError;
use crate::router::ApiState;

/// Primary auth header; `Authorization` is accepted as a fallback when
/// this one is absent.
pub const AUTH_HEADER: &str = "x-ins-auth-key";

/// Reject requests that do not carry the configured secret.
pub async fn require_auth_key(
    State(state): State<ApiState>,
    request: Request,
    next: Next,
) -> Response {
    let headers = request.headers();
    let presented = headers
        .get(AUTH_HEADER)
        .or_else(|| headers.get(header::AUTHORIZATION))
        .and_then(|value| value.to_str().ok());

    match presented {
        Some(key) if key == state.auth_key => next.run(request).await,
        _ => ApiError::Unauthorized.into_response(),
    }
}
