//! Audit event emitter.
//!
//! Writes are fire-and-forget: each emit spawns a task so the caller's
//! primary operation never waits on (or fails because of) the audit
//! store. When the insert fails the event is degraded to a structured log
//! line, preserving forensic value.

use std::time::Duration;

use sqlx::PgPool;
use uuid::Uuid;

use courier_db::models::{AuditEventType, AuditLog, AuditLogFilter, AuditLogStats};

/// Emits and queries audit events.
#[derive(Clone)]
pub struct AuditEmitter {
    pool: PgPool,
}

impl AuditEmitter {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Record an event asynchronously. Never fails the caller.
    pub fn emit(&self, log: AuditLog) {
        let pool = self.pool.clone();
        tokio::spawn(async move {
            if let Err(error) = AuditLog::insert(&pool, &log).await {
                tracing::warn!(
                    target: "audit",
                    event_type = %log.event_type,
                    event_name = %log.event_name,
                    description = log.description.as_deref().unwrap_or(""),
                    batch_id = ?log.batch_id,
                    message_id = ?log.message_id,
                    %error,
                    "audit write failed, falling back to log record"
                );
            }
        });
    }

    /// Write a batch of events in one transaction, synchronously.
    pub async fn write_batch(&self, logs: Vec<AuditLog>) -> Result<(), sqlx::Error> {
        AuditLog::insert_batch(&self.pool, &logs).await
    }

    pub fn batch_started(&self, batch_id: Uuid, message_count: i32) {
        self.emit(
            AuditLog::builder(AuditEventType::BatchStarted, "Batch Processing Started")
                .description(format!(
                    "Started processing batch of up to {message_count} messages"
                ))
                .batch_id(batch_id)
                .message_counts(message_count, 0, 0)
                .build(),
        );
    }

    pub fn batch_completed(
        &self,
        batch_id: Uuid,
        duration: Duration,
        success_count: i32,
        failure_count: i32,
    ) {
        self.emit(
            AuditLog::builder(AuditEventType::BatchCompleted, "Batch Processing Completed")
                .description(format!(
                    "Completed processing batch - {success_count} successful, {failure_count} failed"
                ))
                .batch_id(batch_id)
                .duration(duration)
                .message_counts(success_count + failure_count, success_count, failure_count)
                .build(),
        );
    }

    pub fn batch_failed(&self, batch_id: Uuid, duration: Duration, error: &str) {
        self.emit(
            AuditLog::builder(AuditEventType::BatchFailed, "Batch Processing Failed")
                .description(format!("Batch processing failed: {error}"))
                .batch_id(batch_id)
                .duration(duration)
                .metadata("error", error)
                .build(),
        );
    }

    pub fn message_sent(&self, message_id: Uuid, duration: Duration, webhook_url: &str) {
        self.emit(
            AuditLog::builder(AuditEventType::MessageSent, "Message Sent Successfully")
                .description("Message sent to webhook successfully")
                .message_id(message_id)
                .duration(duration)
                .metadata("webhook_url", webhook_url)
                .build(),
        );
    }

    pub fn message_failed(
        &self,
        message_id: Uuid,
        duration: Duration,
        webhook_url: &str,
        error: &str,
    ) {
        self.emit(
            AuditLog::builder(AuditEventType::MessageFailed, "Message Send Failed")
                .description(format!("Failed to send message: {error}"))
                .message_id(message_id)
                .duration(duration)
                .metadata("webhook_url", webhook_url)
                .metadata("error", error)
                .build(),
        );
    }

    pub fn webhook_request(&self, message_id: Uuid, webhook_url: &str) {
        self.emit(
            AuditLog::builder(AuditEventType::WebhookRequest, "Webhook Request Sent")
                .description("Sent request to webhook endpoint")
                .message_id(message_id)
                .http_details("POST", webhook_url, 0)
                .build(),
        );
    }

    pub fn webhook_response(
        &self,
        message_id: Uuid,
        webhook_url: &str,
        status_code: i32,
        duration: Duration,
    ) {
        self.emit(
            AuditLog::builder(AuditEventType::WebhookResponse, "Webhook Response Received")
                .description(format!(
                    "Received response from webhook with status {status_code}"
                ))
                .message_id(message_id)
                .http_details("POST", webhook_url, status_code)
                .duration(duration)
                .build(),
        );
    }

    #[allow(clippy::too_many_arguments)]
    pub fn api_request(
        &self,
        request_id: &str,
        method: &str,
        endpoint: &str,
        status_code: i32,
        duration: Duration,
        user_agent: &str,
    ) {
        self.emit(
            AuditLog::builder(AuditEventType::ApiRequest, "API Request Processed")
                .description(format!("Processed {method} request to {endpoint}"))
                .request_id(request_id)
                .http_details(method, endpoint, status_code)
                .duration(duration)
                .metadata("user_agent", user_agent)
                .build(),
        );
    }

    pub fn scheduler_started(&self) {
        self.emit(
            AuditLog::builder(AuditEventType::SchedulerStarted, "Message Scheduler Started")
                .description("Message processing scheduler has been started")
                .build(),
        );
    }

    pub fn scheduler_stopped(&self) {
        self.emit(
            AuditLog::builder(AuditEventType::SchedulerStopped, "Message Scheduler Stopped")
                .description("Message processing scheduler has been stopped")
                .build(),
        );
    }

    // ── Read path ──────────────────────────────────────────────────────

    pub async fn query(&self, filter: &AuditLogFilter) -> Result<Vec<AuditLog>, sqlx::Error> {
        AuditLog::query(&self.pool, filter).await
    }

    pub async fn batch_events(&self, batch_id: Uuid) -> Result<Vec<AuditLog>, sqlx::Error> {
        AuditLog::query(&self.pool, &AuditLogFilter::for_batch(batch_id)).await
    }

    pub async fn message_events(&self, message_id: Uuid) -> Result<Vec<AuditLog>, sqlx::Error> {
        AuditLog::query(&self.pool, &AuditLogFilter::for_message(message_id)).await
    }

    pub async fn stats(&self, filter: &AuditLogFilter) -> Result<AuditLogStats, sqlx::Error> {
        AuditLog::stats(&self.pool, filter).await
    }

    /// Delete events older than `days` days; returns the number removed.
    pub async fn cleanup(&self, days: i32) -> Result<u64, sqlx::Error> {
        AuditLog::delete_older_than(&self.pool, days).await
    }
}
