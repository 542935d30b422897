//! Message database model.
//!
//! A message moves through `pending → sending → {sent | failed |
//! dead_letter}`, with `failed → sending` as the only cycle. Every
//! transition is a conditional UPDATE so that under concurrent workers at
//! most one observes `rows_affected = 1`; callers treat zero rows as
//! "someone else owns this message".

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::dead_letter::NewDeadLetter;

/// Delivery status of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "message_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Pending,
    Sending,
    Sent,
    Failed,
    DeadLetter,
}

impl MessageStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Pending => "pending",
            MessageStatus::Sending => "sending",
            MessageStatus::Sent => "sent",
            MessageStatus::Failed => "failed",
            MessageStatus::DeadLetter => "dead_letter",
        }
    }

    /// Terminal statuses admit no further transitions.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, MessageStatus::Sent | MessageStatus::DeadLetter)
    }
}

impl std::fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Database entity for an outbound message.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub phone_number: String,
    pub content: String,
    pub status: MessageStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<String>,
    pub retry_count: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_retry_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_retry_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a new message.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub phone_number: String,
    pub content: String,
}

impl Message {
    /// Insert a new message with `status = 'pending'`.
    pub async fn create(pool: &PgPool, input: NewMessage) -> Result<Self, sqlx::Error> {
        sqlx::query_as(
            r#"
            INSERT INTO messages (id, phone_number, content, status, retry_count)
            VALUES ($1, $2, $3, 'pending', 0)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&input.phone_number)
        .bind(&input.content)
        .fetch_one(pool)
        .await
    }

    /// Look up a single message.
    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(r#"SELECT * FROM messages WHERE id = $1"#)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Messages never attempted, oldest first.
    pub async fn find_pending(pool: &PgPool, limit: i64) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT * FROM messages
            WHERE status = 'pending'
            ORDER BY created_at ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(pool)
        .await
    }

    /// Failed messages whose scheduled retry time has come, most overdue
    /// first.
    pub async fn find_retryable(pool: &PgPool, limit: i64) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT * FROM messages
            WHERE status = 'failed'
              AND next_retry_at IS NOT NULL
              AND next_retry_at <= NOW()
            ORDER BY next_retry_at ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(pool)
        .await
    }

    /// Reserve a message for a delivery attempt.
    ///
    /// Succeeds only from `pending` or `failed`; returns `false` when the
    /// row was not in a reservable state (already reserved, terminal, or
    /// missing).
    pub async fn mark_sending(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE messages
            SET status = 'sending', updated_at = NOW()
            WHERE id = $1 AND status IN ('pending', 'failed')
            "#,
        )
        .bind(id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Record a successful delivery: `sending → sent` with the remote id
    /// and send time set in the same statement.
    pub async fn mark_sent(pool: &PgPool, id: Uuid, remote_id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE messages
            SET status = 'sent', remote_id = $2, sent_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND status = 'sending'
            "#,
        )
        .bind(id)
        .bind(remote_id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Record a failed attempt with a scheduled retry: `sending → failed`.
    pub async fn schedule_retry(
        pool: &PgPool,
        id: Uuid,
        retry_count: i32,
        next_retry_at: DateTime<Utc>,
        failure_reason: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE messages
            SET status = 'failed',
                retry_count = $2,
                last_retry_at = NOW(),
                next_retry_at = $3,
                failure_reason = $4,
                updated_at = NOW()
            WHERE id = $1 AND status = 'sending'
            "#,
        )
        .bind(id)
        .bind(retry_count)
        .bind(next_retry_at)
        .bind(failure_reason)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Move a message to the dead-letter table.
    ///
    /// Flips the status and inserts the DLQ snapshot in a single
    /// transaction. The status flip is conditional on the message not
    /// already being terminal; when it matches zero rows the transaction
    /// is rolled back and `false` is returned (another worker finished
    /// the message first).
    pub async fn move_to_dead_letter(
        pool: &PgPool,
        dead_letter: NewDeadLetter<'_>,
    ) -> Result<bool, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE messages
            SET status = 'dead_letter',
                retry_count = $2,
                failure_reason = $3,
                updated_at = NOW()
            WHERE id = $1 AND status NOT IN ('sent', 'dead_letter')
            "#,
        )
        .bind(dead_letter.original_message_id)
        .bind(dead_letter.retry_count)
        .bind(dead_letter.failure_reason)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            r#"
            INSERT INTO dead_letter_messages (
                id, original_message_id, phone_number, content, retry_count,
                failure_reason, last_attempt_at, webhook_response
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(dead_letter.original_message_id)
        .bind(dead_letter.phone_number)
        .bind(dead_letter.content)
        .bind(dead_letter.retry_count)
        .bind(dead_letter.failure_reason)
        .bind(dead_letter.last_attempt_at)
        .bind(dead_letter.webhook_response)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    /// Page of sent messages, most recent first.
    pub async fn find_sent_page(
        pool: &PgPool,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT * FROM messages
            WHERE status = 'sent'
            ORDER BY sent_at DESC
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await
    }

    /// Reset rows stranded in `sending` (crash mid-dispatch) back to
    /// `pending` so the next batch picks them up. Returns the number of
    /// rows recovered.
    pub async fn reset_orphaned_sending(pool: &PgPool) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE messages
            SET status = 'pending', updated_at = NOW()
            WHERE status = 'sending'
            "#,
        )
        .execute(pool)
        .await?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_serde() {
        let json = serde_json::to_string(&MessageStatus::DeadLetter).unwrap();
        assert_eq!(json, r#""dead_letter""#);

        let status: MessageStatus = serde_json::from_str(r#""pending""#).unwrap();
        assert_eq!(status, MessageStatus::Pending);
    }

    #[test]
    fn terminal_statuses() {
        assert!(MessageStatus::Sent.is_terminal());
        assert!(MessageStatus::DeadLetter.is_terminal());
        assert!(!MessageStatus::Pending.is_terminal());
        assert!(!MessageStatus::Sending.is_terminal());
        assert!(!MessageStatus::Failed.is_terminal());
    }

    #[test]
    fn message_json_omits_unset_fields() {
        let msg = Message {
            id: Uuid::new_v4(),
            phone_number: "+12025550100".to_string(),
            content: "hi".to_string(),
            status: MessageStatus::Pending,
            remote_id: None,
            retry_count: 0,
            last_retry_at: None,
            next_retry_at: None,
            failure_reason: None,
            created_at: Utc::now(),
            sent_at: None,
            updated_at: Utc::now(),
        };

        let value = serde_json::to_value(&msg).unwrap();
        assert!(value.get("remote_id").is_none());
        assert!(value.get("sent_at").is_none());
        assert_eq!(value["status"], "pending");
    }
}
