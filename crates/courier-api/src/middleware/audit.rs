//! Per-request audit trail.

use std::time::Instant;

use axum::extract::{Request, State};
use axum::http::{header, HeaderName, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;
use uuid::Uuid;

use crate::router::ApiState;

/// Record every API request as an `api_request` audit event and tag the
/// response with a request id.
pub async fn audit_api_request(
    State(state): State<ApiState>,
    request: Request,
    next: Next,
) -> Response {
    let request_id = Uuid::new_v4().to_string();
    let method = request.method().to_string();
    let endpoint = request.uri().path().to_string();
    let user_agent = request
        .headers()
        .get(header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let started = Instant::now();
    let mut response = next.run(request).await;

    state.audit.api_request(
        &request_id,
        &method,
        &endpoint,
        i32::from(response.status().as_u16()),
        started.elapsed(),
        &user_agent,
    );

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response
            .headers_mut()
            .insert(HeaderName::from_static("x-request-id"), value);
    }
    response
}
