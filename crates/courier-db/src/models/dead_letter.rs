//! Dead-letter message model.
//!
//! Rows are append-only snapshots of messages that could not be
//! delivered; the core never deletes them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

/// Database entity for a dead-lettered message.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DeadLetterMessage {
    pub id: Uuid,
    pub original_message_id: Uuid,
    pub phone_number: String,
    pub content: String,
    pub retry_count: i32,
    pub failure_reason: String,
    pub last_attempt_at: DateTime<Utc>,
    pub moved_to_dlq_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_response: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Snapshot taken when a message is dead-lettered.
#[derive(Debug, Clone)]
pub struct NewDeadLetter<'a> {
    pub original_message_id: Uuid,
    pub phone_number: &'a str,
    pub content: &'a str,
    pub retry_count: i32,
    pub failure_reason: &'a str,
    pub last_attempt_at: DateTime<Utc>,
    pub webhook_response: Option<&'a str>,
}

impl DeadLetterMessage {
    /// Page of dead-letter records, most recently moved first.
    pub async fn find_page(
        pool: &PgPool,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT * FROM dead_letter_messages
            ORDER BY moved_to_dlq_at DESC
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await
    }
}
