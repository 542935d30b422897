//! Audit trail read endpoints.

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use courier_db::models::{AuditEventType, AuditLog, AuditLogFilter, AuditLogStats};

use crate::error::{ApiError, ApiResult};
use crate::router::ApiState;

/// Query parameters for `/api/audit`. Timestamps are RFC 3339;
/// `event_types` is a comma-separated list.
#[derive(Debug, Deserialize)]
pub struct AuditLogQuery {
    pub event_types: Option<String>,
    pub batch_id: Option<String>,
    pub message_id: Option<String>,
    pub request_id: Option<String>,
    pub endpoint: Option<String>,
    pub from_date: Option<String>,
    pub to_date: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl AuditLogQuery {
    fn into_filter(self) -> Result<AuditLogFilter, ApiError> {
        let mut filter = AuditLogFilter {
            request_id: self.request_id,
            endpoint: self.endpoint,
            ..AuditLogFilter::default()
        };

        if let Some(event_types) = self.event_types {
            filter.event_types = parse_event_types(&event_types)?;
        }
        if let Some(batch_id) = self.batch_id {
            filter.batch_id = Some(parse_uuid(&batch_id, "batch_id")?);
        }
        if let Some(message_id) = self.message_id {
            filter.message_id = Some(parse_uuid(&message_id, "message_id")?);
        }
        if let Some(from_date) = self.from_date {
            filter.from_date = Some(parse_timestamp(&from_date, "from_date")?);
        }
        if let Some(to_date) = self.to_date {
            filter.to_date = Some(parse_timestamp(&to_date, "to_date")?);
        }
        if let Some(limit) = self.limit {
            if limit < 0 {
                return Err(ApiError::BadRequest("invalid limit parameter".to_string()));
            }
            filter.limit = Some(limit);
        }
        if let Some(offset) = self.offset {
            if offset < 0 {
                return Err(ApiError::BadRequest("invalid offset parameter".to_string()));
            }
            filter.offset = Some(offset);
        }

        Ok(filter)
    }
}

fn parse_event_types(raw: &str) -> Result<Vec<AuditEventType>, ApiError> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<AuditEventType>()
                .map_err(ApiError::BadRequest)
        })
        .collect()
}

fn parse_uuid(raw: &str, field: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::BadRequest(format!("invalid {field} format")))
}

fn parse_timestamp(raw: &str, field: &str) -> Result<DateTime<Utc>, ApiError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|timestamp| timestamp.with_timezone(&Utc))
        .map_err(|_| ApiError::BadRequest(format!("invalid {field} format, use RFC 3339")))
}

/// `GET /api/audit` — filtered audit events, most recent first.
pub async fn list_audit_logs_handler(
    State(state): State<ApiState>,
    Query(query): Query<AuditLogQuery>,
) -> ApiResult<Json<Vec<AuditLog>>> {
    let filter = query.into_filter()?;
    let logs = state.audit.query(&filter).await?;
    Ok(Json(logs))
}

/// `GET /api/audit/batch/:batch_id` — events for one batch.
pub async fn batch_audit_logs_handler(
    State(state): State<ApiState>,
    Path(batch_id): Path<String>,
) -> ApiResult<Json<Vec<AuditLog>>> {
    let batch_id = parse_uuid(&batch_id, "batch_id")?;
    let logs = state.audit.batch_events(batch_id).await?;
    Ok(Json(logs))
}

/// `GET /api/audit/message/:message_id` — events for one message.
pub async fn message_audit_logs_handler(
    State(state): State<ApiState>,
    Path(message_id): Path<String>,
) -> ApiResult<Json<Vec<AuditLog>>> {
    let message_id = parse_uuid(&message_id, "message_id")?;
    let logs = state.audit.message_events(message_id).await?;
    Ok(Json(logs))
}

#[derive(Debug, Deserialize)]
pub struct AuditStatsQuery {
    pub event_types: Option<String>,
    pub from_date: Option<String>,
    pub to_date: Option<String>,
}

/// `GET /api/audit/stats` — aggregate statistics.
pub async fn audit_stats_handler(
    State(state): State<ApiState>,
    Query(query): Query<AuditStatsQuery>,
) -> ApiResult<Json<AuditLogStats>> {
    let mut filter = AuditLogFilter::default();
    if let Some(event_types) = query.event_types {
        filter.event_types = parse_event_types(&event_types)?;
    }
    if let Some(from_date) = query.from_date {
        filter.from_date = Some(parse_timestamp(&from_date, "from_date")?);
    }
    if let Some(to_date) = query.to_date {
        filter.to_date = Some(parse_timestamp(&to_date, "to_date")?);
    }

    let stats = state.audit.stats(&filter).await?;
    Ok(Json(stats))
}

#[derive(Debug, Deserialize)]
pub struct CleanupQuery {
    pub days: Option<i32>,
}

#[derive(Debug, Serialize)]
pub struct CleanupResponse {
    pub deleted_count: u64,
}

/// `DELETE /api/audit/cleanup?days=N` — retention prune.
pub async fn audit_cleanup_handler(
    State(state): State<ApiState>,
    Query(query): Query<CleanupQuery>,
) -> ApiResult<Json<CleanupResponse>> {
    let days = match query.days {
        Some(days) if days >= 1 => days,
        _ => {
            return Err(ApiError::BadRequest(
                "days must be a positive integer".to_string(),
            ));
        }
    };

    let deleted_count = state.audit.cleanup(days).await?;
    Ok(Json(CleanupResponse { deleted_count }))
}
