//! Liveness endpoint with component status.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;

use courier_dispatch::SchedulerStatus;

use crate::router::ApiState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
    pub scheduler: SchedulerStatus,
    pub database: &'static str,
    pub cache: &'static str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

/// `GET /api/health` — 200 when all required components respond, 503
/// otherwise. The cache only counts when it is configured.
pub async fn health_handler(
    State(state): State<ApiState>,
) -> (StatusCode, Json<HealthResponse>) {
    let mut errors = Vec::new();

    let database = match sqlx::query("SELECT 1").execute(&state.pool).await {
        Ok(_) => "connected",
        Err(error) => {
            tracing::error!(target: "api", %error, "health check: database unreachable");
            errors.push("database connection failed".to_string());
            "unreachable"
        }
    };

    let cache = match &state.cache {
        None => "not_configured",
        Some(cache) => {
            if cache.ping().await {
                "connected"
            } else {
                errors.push("cache connection failed".to_string());
                "unreachable"
            }
        }
    };

    let healthy = errors.is_empty();
    let response = HealthResponse {
        status: if healthy { "healthy" } else { "unhealthy" },
        timestamp: Utc::now(),
        scheduler: state.scheduler.status().await,
        database,
        cache,
        errors,
    };

    let status_code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status_code, Json(response))
}
