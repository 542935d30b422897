//! Scheduler control endpoint.

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use courier_dispatch::SchedulerStatus;

use crate::error::{ApiError, ApiResult};
use crate::router::ApiState;

#[derive(Debug, Deserialize)]
pub struct ControlRequest {
    #[serde(default)]
    pub action: String,
}

#[derive(Debug, Serialize)]
pub struct ControlResponse {
    pub success: bool,
    pub message: String,
    pub status: SchedulerStatus,
}

/// `POST /api/control` — start or stop the scheduler.
///
/// Control conflicts ("already running", "not running") come back as a
/// 200 with `success = false`; only an unknown action is a 400.
pub async fn control_handler(
    State(state): State<ApiState>,
    Json(request): Json<ControlRequest>,
) -> ApiResult<Json<ControlResponse>> {
    let (success, message) = match request.action.as_str() {
        "start" => match state.scheduler.start().await {
            Ok(()) => (true, "scheduler started successfully".to_string()),
            Err(error) => (false, error.to_string()),
        },
        "stop" => match state.scheduler.stop().await {
            Ok(()) => (true, "scheduler stopped successfully".to_string()),
            Err(error) => (false, error.to_string()),
        },
        _ => {
            return Err(ApiError::BadRequest(
                "invalid action, use \"start\" or \"stop\"".to_string(),
            ));
        }
    };

    Ok(Json(ControlResponse {
        success,
        message,
        status: state.scheduler.status().await,
    }))
}
