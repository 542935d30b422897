//! Audit log model: append-only records of lifecycle events.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

/// The closed set of audited event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "audit_event_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    BatchStarted,
    BatchCompleted,
    BatchFailed,
    MessageSent,
    MessageFailed,
    SchedulerStarted,
    SchedulerStopped,
    ApiRequest,
    WebhookRequest,
    WebhookResponse,
}

impl AuditEventType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventType::BatchStarted => "batch_started",
            AuditEventType::BatchCompleted => "batch_completed",
            AuditEventType::BatchFailed => "batch_failed",
            AuditEventType::MessageSent => "message_sent",
            AuditEventType::MessageFailed => "message_failed",
            AuditEventType::SchedulerStarted => "scheduler_started",
            AuditEventType::SchedulerStopped => "scheduler_stopped",
            AuditEventType::ApiRequest => "api_request",
            AuditEventType::WebhookRequest => "webhook_request",
            AuditEventType::WebhookResponse => "webhook_response",
        }
    }
}

impl std::fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AuditEventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "batch_started" => Ok(AuditEventType::BatchStarted),
            "batch_completed" => Ok(AuditEventType::BatchCompleted),
            "batch_failed" => Ok(AuditEventType::BatchFailed),
            "message_sent" => Ok(AuditEventType::MessageSent),
            "message_failed" => Ok(AuditEventType::MessageFailed),
            "scheduler_started" => Ok(AuditEventType::SchedulerStarted),
            "scheduler_stopped" => Ok(AuditEventType::SchedulerStopped),
            "api_request" => Ok(AuditEventType::ApiRequest),
            "webhook_request" => Ok(AuditEventType::WebhookRequest),
            "webhook_response" => Ok(AuditEventType::WebhookResponse),
            other => Err(format!("unknown audit event type: {other}")),
        }
    }
}

/// Database entity for a single audit event.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct AuditLog {
    pub id: Uuid,
    pub event_type: AuditEventType,
    pub event_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    // Context
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,

    // Request/response details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<i32>,

    // Metrics
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_count: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success_count: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_count: Option<i32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<JsonValue>,
    pub created_at: DateTime<Utc>,
}

impl AuditLog {
    /// Start building an audit event.
    #[must_use]
    pub fn builder(event_type: AuditEventType, event_name: impl Into<String>) -> AuditLogBuilder {
        AuditLogBuilder {
            log: AuditLog {
                id: Uuid::new_v4(),
                event_type,
                event_name: event_name.into(),
                description: None,
                batch_id: None,
                message_id: None,
                request_id: None,
                http_method: None,
                endpoint: None,
                status_code: None,
                duration_ms: None,
                message_count: None,
                success_count: None,
                failure_count: None,
                metadata: None,
                created_at: Utc::now(),
            },
            metadata: serde_json::Map::new(),
        }
    }

    /// Insert a single audit event.
    pub async fn insert(pool: &PgPool, log: &AuditLog) -> Result<(), sqlx::Error> {
        Self::insert_into(pool, log).await
    }

    /// Insert a batch of audit events in one transaction.
    pub async fn insert_batch(pool: &PgPool, logs: &[AuditLog]) -> Result<(), sqlx::Error> {
        if logs.is_empty() {
            return Ok(());
        }

        let mut tx = pool.begin().await?;
        for log in logs {
            Self::insert_into(&mut *tx, log).await?;
        }
        tx.commit().await
    }

    async fn insert_into<'e, E>(executor: E, log: &AuditLog) -> Result<(), sqlx::Error>
    where
        E: sqlx::Executor<'e, Database = Postgres>,
    {
        sqlx::query(
            r#"
            INSERT INTO audit_logs (
                id, event_type, event_name, description, batch_id, message_id,
                request_id, http_method, endpoint, status_code, duration_ms,
                message_count, success_count, failure_count, metadata, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(log.id)
        .bind(log.event_type)
        .bind(&log.event_name)
        .bind(&log.description)
        .bind(log.batch_id)
        .bind(log.message_id)
        .bind(&log.request_id)
        .bind(&log.http_method)
        .bind(&log.endpoint)
        .bind(log.status_code)
        .bind(log.duration_ms)
        .bind(log.message_count)
        .bind(log.success_count)
        .bind(log.failure_count)
        .bind(&log.metadata)
        .bind(log.created_at)
        .execute(executor)
        .await?;

        Ok(())
    }

    /// Query audit events with optional filters, most recent first.
    ///
    /// The limit defaults to 100 when the filter does not set one.
    pub async fn query(pool: &PgPool, filter: &AuditLogFilter) -> Result<Vec<Self>, sqlx::Error> {
        let mut builder = QueryBuilder::new("SELECT * FROM audit_logs WHERE TRUE");
        push_filters(&mut builder, filter);

        builder.push(" ORDER BY created_at DESC");
        builder.push(" LIMIT ");
        builder.push_bind(filter.limit.unwrap_or(100));
        builder.push(" OFFSET ");
        builder.push_bind(filter.offset.unwrap_or(0));

        builder.build_query_as::<AuditLog>().fetch_all(pool).await
    }

    /// Aggregate statistics over (optionally filtered) audit events.
    pub async fn stats(
        pool: &PgPool,
        filter: &AuditLogFilter,
    ) -> Result<AuditLogStats, sqlx::Error> {
        let mut builder = QueryBuilder::new(
            "SELECT event_type, COUNT(*), COUNT(duration_ms), MAX(created_at), \
             AVG(duration_ms)::float8 FROM audit_logs WHERE TRUE",
        );
        push_filters(&mut builder, filter);
        builder.push(" GROUP BY event_type");

        let rows: Vec<(AuditEventType, i64, i64, Option<DateTime<Utc>>, Option<f64>)> =
            builder.build_query_as().fetch_all(pool).await?;

        let mut stats = AuditLogStats::default();
        let mut weighted_duration = 0.0;
        let mut duration_count = 0i64;

        for (event_type, count, with_duration, last_event, avg_duration) in rows {
            stats.total_count += count;
            stats
                .event_type_counts
                .insert(event_type.as_str().to_string(), count);

            if let Some(last_event) = last_event {
                if stats.last_event_time.map_or(true, |t| last_event > t) {
                    stats.last_event_time = Some(last_event);
                }
            }

            if let Some(avg) = avg_duration {
                weighted_duration += avg * with_duration as f64;
                duration_count += with_duration;
            }
        }

        if duration_count > 0 {
            stats.average_duration_ms = Some(weighted_duration / duration_count as f64);
        }

        Ok(stats)
    }

    /// Delete events older than `days` days, returning how many were
    /// removed.
    pub async fn delete_older_than(pool: &PgPool, days: i32) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"DELETE FROM audit_logs WHERE created_at < NOW() - ($1 * INTERVAL '1 day')"#,
        )
        .bind(days)
        .execute(pool)
        .await?;

        Ok(result.rows_affected())
    }
}

fn push_filters(builder: &mut QueryBuilder<'_, Postgres>, filter: &AuditLogFilter) {
    if !filter.event_types.is_empty() {
        builder.push(" AND event_type = ANY(");
        builder.push_bind(filter.event_types.clone());
        builder.push(")");
    }
    if let Some(batch_id) = filter.batch_id {
        builder.push(" AND batch_id = ");
        builder.push_bind(batch_id);
    }
    if let Some(message_id) = filter.message_id {
        builder.push(" AND message_id = ");
        builder.push_bind(message_id);
    }
    if let Some(request_id) = &filter.request_id {
        builder.push(" AND request_id = ");
        builder.push_bind(request_id.clone());
    }
    if let Some(endpoint) = &filter.endpoint {
        builder.push(" AND endpoint = ");
        builder.push_bind(endpoint.clone());
    }
    if let Some(from_date) = filter.from_date {
        builder.push(" AND created_at >= ");
        builder.push_bind(from_date);
    }
    if let Some(to_date) = filter.to_date {
        builder.push(" AND created_at <= ");
        builder.push_bind(to_date);
    }
}

/// Filter for querying audit events.
#[derive(Debug, Clone, Default)]
pub struct AuditLogFilter {
    pub event_types: Vec<AuditEventType>,
    pub batch_id: Option<Uuid>,
    pub message_id: Option<Uuid>,
    pub request_id: Option<String>,
    pub endpoint: Option<String>,
    pub from_date: Option<DateTime<Utc>>,
    pub to_date: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl AuditLogFilter {
    /// Filter restricted to one batch.
    #[must_use]
    pub fn for_batch(batch_id: Uuid) -> Self {
        Self {
            batch_id: Some(batch_id),
            ..Self::default()
        }
    }

    /// Filter restricted to one message.
    #[must_use]
    pub fn for_message(message_id: Uuid) -> Self {
        Self {
            message_id: Some(message_id),
            ..Self::default()
        }
    }
}

/// Aggregate statistics about audit events.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditLogStats {
    pub total_count: i64,
    pub event_type_counts: BTreeMap<String, i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_event_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_duration_ms: Option<f64>,
}

/// Incremental builder for audit events.
#[derive(Debug)]
pub struct AuditLogBuilder {
    log: AuditLog,
    metadata: serde_json::Map<String, JsonValue>,
}

impl AuditLogBuilder {
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.log.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn batch_id(mut self, batch_id: Uuid) -> Self {
        self.log.batch_id = Some(batch_id);
        self
    }

    #[must_use]
    pub fn message_id(mut self, message_id: Uuid) -> Self {
        self.log.message_id = Some(message_id);
        self
    }

    #[must_use]
    pub fn request_id(mut self, request_id: impl Into<String>) -> Self {
        self.log.request_id = Some(request_id.into());
        self
    }

    #[must_use]
    pub fn http_details(
        mut self,
        method: impl Into<String>,
        endpoint: impl Into<String>,
        status_code: i32,
    ) -> Self {
        self.log.http_method = Some(method.into());
        self.log.endpoint = Some(endpoint.into());
        self.log.status_code = Some(status_code);
        self
    }

    #[must_use]
    pub fn duration(mut self, duration: Duration) -> Self {
        self.log.duration_ms = Some(duration.as_millis().min(i32::MAX as u128) as i32);
        self
    }

    #[must_use]
    pub fn message_counts(mut self, total: i32, success: i32, failure: i32) -> Self {
        self.log.message_count = Some(total);
        self.log.success_count = Some(success);
        self.log.failure_count = Some(failure);
        self
    }

    #[must_use]
    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn build(mut self) -> AuditLog {
        if !self.metadata.is_empty() {
            self.log.metadata = Some(JsonValue::Object(self.metadata));
        }
        self.log
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_collects_metadata() {
        let log = AuditLog::builder(AuditEventType::MessageSent, "Message Sent Successfully")
            .message_id(Uuid::new_v4())
            .duration(Duration::from_millis(42))
            .metadata("webhook_url", "https://example.com/hook")
            .build();

        assert_eq!(log.event_type, AuditEventType::MessageSent);
        assert_eq!(log.duration_ms, Some(42));
        let metadata = log.metadata.expect("metadata set");
        assert_eq!(metadata["webhook_url"], "https://example.com/hook");
    }

    #[test]
    fn builder_without_metadata_leaves_none() {
        let log = AuditLog::builder(AuditEventType::SchedulerStarted, "Scheduler Started").build();
        assert!(log.metadata.is_none());
    }

    #[test]
    fn event_type_parses_from_str() {
        assert_eq!(
            "webhook_response".parse::<AuditEventType>().unwrap(),
            AuditEventType::WebhookResponse
        );
        assert!("nope".parse::<AuditEventType>().is_err());
    }

    #[test]
    fn event_type_serde_names_match_as_str() {
        for event_type in [
            AuditEventType::BatchStarted,
            AuditEventType::BatchCompleted,
            AuditEventType::BatchFailed,
            AuditEventType::MessageSent,
            AuditEventType::MessageFailed,
            AuditEventType::SchedulerStarted,
            AuditEventType::SchedulerStopped,
            AuditEventType::ApiRequest,
            AuditEventType::WebhookRequest,
            AuditEventType::WebhookResponse,
        ] {
            let json = serde_json::to_string(&event_type).unwrap();
            assert_eq!(json, format!("\"{}\"", event_type.as_str()));
        }
    }
}
