//! Dispatcher: one delivery attempt for one message.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use courier_db::models::{Message, NewDeadLetter};

use crate::audit::AuditEmitter;
use crate::cache::MessageCache;
use crate::error::DispatchError;
use crate::retry::{RetryDecision, RetryPolicy};
use crate::sender::WebhookSender;
use crate::store::MessageStore;
use crate::validation;

/// Reason recorded when a message fails re-validation at dispatch time.
pub const CONTENT_TOO_LONG_REASON: &str = "content exceeds maximum length";

/// Result of a single dispatch attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Delivered; the message is `sent`.
    Sent,
    /// Failed; a retry is scheduled and the message is `failed`.
    Retried { reason: String },
    /// Failed permanently; the message is `dead_letter`.
    DeadLettered { reason: String },
    /// Nothing to do: the message was terminal or another worker owns it.
    Skipped,
    /// The attempt was canceled mid-flight; the message may remain in
    /// `sending` until the orphan sweep reclaims it.
    Canceled,
}

/// Runs one message through one attempt: reserve, send, record the
/// outcome, emit audit events. Idempotent per call — a message already in
/// a terminal state is left untouched.
pub struct Dispatcher {
    store: Arc<dyn MessageStore>,
    sender: Arc<WebhookSender>,
    retry_policy: RetryPolicy,
    max_length: usize,
    cache: Option<MessageCache>,
    audit: Option<AuditEmitter>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        store: Arc<dyn MessageStore>,
        sender: Arc<WebhookSender>,
        retry_policy: RetryPolicy,
        max_length: usize,
    ) -> Self {
        Self {
            store,
            sender,
            retry_policy,
            max_length,
            cache: None,
            audit: None,
        }
    }

    /// Attach the write-through cache.
    #[must_use]
    pub fn with_cache(mut self, cache: MessageCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Attach an audit emitter.
    #[must_use]
    pub fn with_audit(mut self, audit: AuditEmitter) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Run one delivery attempt.
    ///
    /// # Errors
    ///
    /// Only store failures surface; webhook failures are absorbed into
    /// the retry policy.
    pub async fn dispatch(
        &self,
        message: &Message,
        cancel: &CancellationToken,
    ) -> Result<DispatchOutcome, DispatchError> {
        if message.status.is_terminal() {
            return Ok(DispatchOutcome::Skipped);
        }

        // Configuration may have tightened since intake.
        if !validation::content_within_limit(&message.content, self.max_length) {
            return self.dead_letter_without_send(message).await;
        }

        if !self.store.mark_sending(message.id).await? {
            tracing::debug!(
                target: "dispatch",
                message_id = %message.id,
                "message not reservable, skipping"
            );
            return Ok(DispatchOutcome::Skipped);
        }

        tracing::info!(
            target: "dispatch",
            message_id = %message.id,
            phone_number = %message.phone_number,
            "sending message"
        );

        let started = Instant::now();
        let result = self
            .sender
            .send(message.id, &message.phone_number, &message.content, cancel)
            .await;
        let elapsed = started.elapsed();

        match result {
            Ok(remote_id) => self.record_sent(message, &remote_id, elapsed).await,
            Err(error) if error.is_canceled() => {
                tracing::warn!(
                    target: "dispatch",
                    message_id = %message.id,
                    "dispatch canceled mid-attempt"
                );
                Ok(DispatchOutcome::Canceled)
            }
            Err(error) => self.record_failure(message, &error.to_string(), elapsed).await,
        }
    }

    async fn record_sent(
        &self,
        message: &Message,
        remote_id: &str,
        elapsed: Duration,
    ) -> Result<DispatchOutcome, DispatchError> {
        self.store.mark_sent(message.id, remote_id).await?;

        if let Some(cache) = &self.cache {
            cache.store_delivery(remote_id, message).await;
        }
        if let Some(audit) = &self.audit {
            audit.message_sent(message.id, elapsed, self.sender.endpoint());
        }

        tracing::info!(
            target: "dispatch",
            message_id = %message.id,
            remote_id,
            "message sent"
        );
        Ok(DispatchOutcome::Sent)
    }

    async fn record_failure(
        &self,
        message: &Message,
        error: &str,
        elapsed: Duration,
    ) -> Result<DispatchOutcome, DispatchError> {
        let attempt = message.retry_count + 1;
        let outcome = match self.retry_policy.decide(attempt as u32, error) {
            RetryDecision::RetryAt(next_retry_at) => {
                self.store
                    .schedule_retry(message.id, attempt, next_retry_at, error)
                    .await?;
                tracing::warn!(
                    target: "dispatch",
                    message_id = %message.id,
                    retry_count = attempt,
                    next_retry_at = %next_retry_at,
                    "delivery failed, retry scheduled"
                );
                DispatchOutcome::Retried {
                    reason: error.to_string(),
                }
            }
            RetryDecision::DeadLetter(reason) => {
                self.store
                    .move_to_dead_letter(NewDeadLetter {
                        original_message_id: message.id,
                        phone_number: &message.phone_number,
                        content: &message.content,
                        retry_count: attempt,
                        failure_reason: &reason,
                        last_attempt_at: Utc::now(),
                        webhook_response: Some(error),
                    })
                    .await?;
                tracing::error!(
                    target: "dispatch",
                    message_id = %message.id,
                    retry_count = attempt,
                    reason,
                    "delivery failed permanently, message dead-lettered"
                );
                DispatchOutcome::DeadLettered { reason }
            }
        };

        if let Some(audit) = &self.audit {
            audit.message_failed(message.id, elapsed, self.sender.endpoint(), error);
        }
        Ok(outcome)
    }

    /// Dispatch-time validation failure: straight to the dead-letter
    /// table, no webhook call, no retry.
    async fn dead_letter_without_send(
        &self,
        message: &Message,
    ) -> Result<DispatchOutcome, DispatchError> {
        let moved = self
            .store
            .move_to_dead_letter(NewDeadLetter {
                original_message_id: message.id,
                phone_number: &message.phone_number,
                content: &message.content,
                retry_count: message.retry_count,
                failure_reason: CONTENT_TOO_LONG_REASON,
                last_attempt_at: Utc::now(),
                webhook_response: None,
            })
            .await?;

        if !moved {
            return Ok(DispatchOutcome::Skipped);
        }

        if let Some(audit) = &self.audit {
            audit.message_failed(
                message.id,
                Duration::ZERO,
                self.sender.endpoint(),
                CONTENT_TOO_LONG_REASON,
            );
        }
        tracing::error!(
            target: "dispatch",
            message_id = %message.id,
            content_length = message.content.len(),
            max_length = self.max_length,
            "message rejected at dispatch time, dead-lettered"
        );
        Ok(DispatchOutcome::DeadLettered {
            reason: CONTENT_TOO_LONG_REASON.to_string(),
        })
    }
}
