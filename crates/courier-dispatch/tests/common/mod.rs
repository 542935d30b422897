//! Shared fixtures for dispatch engine tests.
//!
//! Provides an in-memory [`MessageStore`] with the same conditional
//! transition semantics as the PostgreSQL store, plus helpers for wiring
//! a dispatcher against a wiremock webhook endpoint.

// Each test binary compiles this module separately and uses a subset.
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use courier_db::models::{DeadLetterMessage, Message, MessageStatus, NewDeadLetter, NewMessage};
use courier_dispatch::{
    Dispatcher, MessageService, MessageStore, RetryPolicy, WebhookConfig, WebhookSender,
};

pub const TEST_AUTH_KEY: &str = "test-auth-key";

/// In-memory message store mirroring the SQL transition rules.
#[derive(Default)]
pub struct InMemoryStore {
    messages: Mutex<Vec<Message>>,
    dead_letters: Mutex<Vec<DeadLetterMessage>>,
    fail_reads: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make subsequent reads fail, to exercise batch failure paths.
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn insert(&self, message: Message) {
        self.messages.lock().unwrap().push(message);
    }

    pub fn get(&self, id: Uuid) -> Option<Message> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .find(|m| m.id == id)
            .cloned()
    }

    pub fn dead_letters(&self) -> Vec<DeadLetterMessage> {
        self.dead_letters.lock().unwrap().clone()
    }

    pub fn all_messages(&self) -> Vec<Message> {
        self.messages.lock().unwrap().clone()
    }

    fn read_guard(&self) -> Result<(), sqlx::Error> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(sqlx::Error::PoolClosed);
        }
        Ok(())
    }
}

#[async_trait]
impl MessageStore for InMemoryStore {
    async fn create(&self, input: NewMessage) -> Result<Message, sqlx::Error> {
        let message = build_message(&input.phone_number, &input.content);
        self.insert(message.clone());
        Ok(message)
    }

    async fn pending(&self, limit: i64) -> Result<Vec<Message>, sqlx::Error> {
        self.read_guard()?;
        let mut pending: Vec<Message> = self
            .messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.status == MessageStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|m| m.created_at);
        pending.truncate(limit as usize);
        Ok(pending)
    }

    async fn retryable(&self, limit: i64) -> Result<Vec<Message>, sqlx::Error> {
        self.read_guard()?;
        let now = Utc::now();
        let mut retryable: Vec<Message> = self
            .messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| {
                m.status == MessageStatus::Failed
                    && m.next_retry_at.map_or(false, |at| at <= now)
            })
            .cloned()
            .collect();
        retryable.sort_by_key(|m| m.next_retry_at);
        retryable.truncate(limit as usize);
        Ok(retryable)
    }

    async fn mark_sending(&self, id: Uuid) -> Result<bool, sqlx::Error> {
        let mut messages = self.messages.lock().unwrap();
        let Some(message) = messages.iter_mut().find(|m| {
            m.id == id
                && matches!(m.status, MessageStatus::Pending | MessageStatus::Failed)
        }) else {
            return Ok(false);
        };
        message.status = MessageStatus::Sending;
        message.updated_at = Utc::now();
        Ok(true)
    }

    async fn mark_sent(&self, id: Uuid, remote_id: &str) -> Result<bool, sqlx::Error> {
        let mut messages = self.messages.lock().unwrap();
        let Some(message) = messages
            .iter_mut()
            .find(|m| m.id == id && m.status == MessageStatus::Sending)
        else {
            return Ok(false);
        };
        message.status = MessageStatus::Sent;
        message.remote_id = Some(remote_id.to_string());
        message.sent_at = Some(Utc::now());
        message.updated_at = Utc::now();
        Ok(true)
    }

    async fn schedule_retry(
        &self,
        id: Uuid,
        retry_count: i32,
        next_retry_at: DateTime<Utc>,
        failure_reason: &str,
    ) -> Result<bool, sqlx::Error> {
        let mut messages = self.messages.lock().unwrap();
        let Some(message) = messages
            .iter_mut()
            .find(|m| m.id == id && m.status == MessageStatus::Sending)
        else {
            return Ok(false);
        };
        message.status = MessageStatus::Failed;
        message.retry_count = retry_count;
        message.last_retry_at = Some(Utc::now());
        message.next_retry_at = Some(next_retry_at);
        message.failure_reason = Some(failure_reason.to_string());
        message.updated_at = Utc::now();
        Ok(true)
    }

    async fn move_to_dead_letter(
        &self,
        dead_letter: NewDeadLetter<'_>,
    ) -> Result<bool, sqlx::Error> {
        let mut messages = self.messages.lock().unwrap();
        let Some(message) = messages
            .iter_mut()
            .find(|m| m.id == dead_letter.original_message_id && !m.status.is_terminal())
        else {
            return Ok(false);
        };
        message.status = MessageStatus::DeadLetter;
        message.retry_count = dead_letter.retry_count;
        message.failure_reason = Some(dead_letter.failure_reason.to_string());
        message.updated_at = Utc::now();

        self.dead_letters.lock().unwrap().push(DeadLetterMessage {
            id: Uuid::new_v4(),
            original_message_id: dead_letter.original_message_id,
            phone_number: dead_letter.phone_number.to_string(),
            content: dead_letter.content.to_string(),
            retry_count: dead_letter.retry_count,
            failure_reason: dead_letter.failure_reason.to_string(),
            last_attempt_at: dead_letter.last_attempt_at,
            moved_to_dlq_at: Utc::now(),
            webhook_response: dead_letter.webhook_response.map(str::to_string),
            created_at: Utc::now(),
        });
        Ok(true)
    }

    async fn sent_page(&self, limit: i64, offset: i64) -> Result<Vec<Message>, sqlx::Error> {
        self.read_guard()?;
        let mut sent: Vec<Message> = self
            .messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.status == MessageStatus::Sent)
            .cloned()
            .collect();
        sent.sort_by_key(|m| std::cmp::Reverse(m.sent_at));
        Ok(sent
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    async fn dead_letter_page(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<DeadLetterMessage>, sqlx::Error> {
        self.read_guard()?;
        let mut records = self.dead_letters.lock().unwrap().clone();
        records.sort_by_key(|r| std::cmp::Reverse(r.moved_to_dlq_at));
        Ok(records
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    async fn reset_orphaned_sending(&self) -> Result<u64, sqlx::Error> {
        let mut messages = self.messages.lock().unwrap();
        let mut recovered = 0;
        for message in messages.iter_mut() {
            if message.status == MessageStatus::Sending {
                message.status = MessageStatus::Pending;
                message.updated_at = Utc::now();
                recovered += 1;
            }
        }
        Ok(recovered)
    }
}

/// A fresh pending message.
pub fn build_message(phone_number: &str, content: &str) -> Message {
    Message {
        id: Uuid::new_v4(),
        phone_number: phone_number.to_string(),
        content: content.to_string(),
        status: MessageStatus::Pending,
        remote_id: None,
        retry_count: 0,
        last_retry_at: None,
        next_retry_at: None,
        failure_reason: None,
        created_at: Utc::now(),
        sent_at: None,
        updated_at: Utc::now(),
    }
}

/// A sender pointed at a mock endpoint, with a short timeout.
pub fn sender_for(uri: &str, max_retries: u32) -> WebhookSender {
    WebhookSender::new(WebhookConfig {
        url: format!("{uri}/webhook"),
        auth_key: TEST_AUTH_KEY.to_string(),
        timeout: Duration::from_secs(5),
        max_retries,
    })
    .expect("sender builds")
}

/// A dispatcher over the given store and mock endpoint.
pub fn dispatcher_for(
    store: Arc<InMemoryStore>,
    uri: &str,
    sender_retries: u32,
    max_length: usize,
) -> Arc<Dispatcher> {
    Arc::new(Dispatcher::new(
        store,
        Arc::new(sender_for(uri, sender_retries)),
        RetryPolicy::default(),
        max_length,
    ))
}

/// A message service over the given store and mock endpoint.
pub fn service_for(
    store: Arc<InMemoryStore>,
    uri: &str,
    sender_retries: u32,
    max_length: usize,
) -> Arc<MessageService> {
    let dispatcher = dispatcher_for(store.clone(), uri, sender_retries, max_length);
    Arc::new(MessageService::new(store, dispatcher, max_length))
}

pub fn no_cancel() -> CancellationToken {
    CancellationToken::new()
}
