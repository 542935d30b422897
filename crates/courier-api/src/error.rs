//! API error type and its HTTP mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use courier_dispatch::CreateMessageError;

/// API-level errors, rendered as `{"error": "..."}` with a matching
/// status code.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("invalid phone number format")]
    InvalidPhoneNumber,

    #[error("message content exceeds maximum length")]
    ContentTooLong,

    #[error("{0}")]
    BadRequest(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

/// JSON error body returned by all endpoints.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl From<CreateMessageError> for ApiError {
    fn from(error: CreateMessageError) -> Self {
        match error {
            CreateMessageError::InvalidPhoneNumber => ApiError::InvalidPhoneNumber,
            CreateMessageError::ContentTooLong => ApiError::ContentTooLong,
            CreateMessageError::Db(error) => ApiError::Database(error),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::InvalidPhoneNumber | ApiError::ContentTooLong | ApiError::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Database(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(target: "api", error = %self, "request failed");
        }

        let body = ErrorResponse {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
