//! Message store abstraction.
//!
//! The dispatcher and schedulers talk to the store through this trait so
//! the engine can be exercised against an in-memory implementation in
//! tests; production uses [`PgMessageStore`], which delegates to the
//! courier-db models.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use courier_db::models::{DeadLetterMessage, Message, NewDeadLetter, NewMessage};

/// Durable persistence of messages and dead-letter records.
///
/// All status transitions are conditional: the `mark_*` methods return
/// `false` when the row was not in the expected state, which callers
/// treat as "another worker handled it".
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn create(&self, input: NewMessage) -> Result<Message, sqlx::Error>;

    async fn pending(&self, limit: i64) -> Result<Vec<Message>, sqlx::Error>;

    async fn retryable(&self, limit: i64) -> Result<Vec<Message>, sqlx::Error>;

    async fn mark_sending(&self, id: Uuid) -> Result<bool, sqlx::Error>;

    async fn mark_sent(&self, id: Uuid, remote_id: &str) -> Result<bool, sqlx::Error>;

    async fn schedule_retry(
        &self,
        id: Uuid,
        retry_count: i32,
        next_retry_at: DateTime<Utc>,
        failure_reason: &str,
    ) -> Result<bool, sqlx::Error>;

    async fn move_to_dead_letter(
        &self,
        dead_letter: NewDeadLetter<'_>,
    ) -> Result<bool, sqlx::Error>;

    async fn sent_page(&self, limit: i64, offset: i64) -> Result<Vec<Message>, sqlx::Error>;

    async fn dead_letter_page(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<DeadLetterMessage>, sqlx::Error>;

    async fn reset_orphaned_sending(&self) -> Result<u64, sqlx::Error>;
}

/// PostgreSQL-backed message store.
#[derive(Clone)]
pub struct PgMessageStore {
    pool: PgPool,
}

impl PgMessageStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageStore for PgMessageStore {
    async fn create(&self, input: NewMessage) -> Result<Message, sqlx::Error> {
        Message::create(&self.pool, input).await
    }

    async fn pending(&self, limit: i64) -> Result<Vec<Message>, sqlx::Error> {
        Message::find_pending(&self.pool, limit).await
    }

    async fn retryable(&self, limit: i64) -> Result<Vec<Message>, sqlx::Error> {
        Message::find_retryable(&self.pool, limit).await
    }

    async fn mark_sending(&self, id: Uuid) -> Result<bool, sqlx::Error> {
        Message::mark_sending(&self.pool, id).await
    }

    async fn mark_sent(&self, id: Uuid, remote_id: &str) -> Result<bool, sqlx::Error> {
        Message::mark_sent(&self.pool, id, remote_id).await
    }

    async fn schedule_retry(
        &self,
        id: Uuid,
        retry_count: i32,
        next_retry_at: DateTime<Utc>,
        failure_reason: &str,
    ) -> Result<bool, sqlx::Error> {
        Message::schedule_retry(&self.pool, id, retry_count, next_retry_at, failure_reason).await
    }

    async fn move_to_dead_letter(
        &self,
        dead_letter: NewDeadLetter<'_>,
    ) -> Result<bool, sqlx::Error> {
        Message::move_to_dead_letter(&self.pool, dead_letter).await
    }

    async fn sent_page(&self, limit: i64, offset: i64) -> Result<Vec<Message>, sqlx::Error> {
        Message::find_sent_page(&self.pool, limit, offset).await
    }

    async fn dead_letter_page(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<DeadLetterMessage>, sqlx::Error> {
        DeadLetterMessage::find_page(&self.pool, limit, offset).await
    }

    async fn reset_orphaned_sending(&self) -> Result<u64, sqlx::Error> {
        Message::reset_orphaned_sending(&self.pool).await
    }
}
