//! Message service: intake, batch coordination and read queries.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use courier_db::models::{DeadLetterMessage, Message, NewMessage};

use crate::dispatcher::{DispatchOutcome, Dispatcher};
use crate::error::{CreateMessageError, DispatchError};
use crate::store::MessageStore;
use crate::transport::Transport;
use crate::validation;

/// Default page size for list queries.
pub const DEFAULT_PAGE_SIZE: i64 = 20;

/// Largest accepted page size.
pub const MAX_PAGE_SIZE: i64 = 100;

/// Clamp a 1-based page number; out-of-range values fall back to 1.
#[must_use]
pub fn normalize_page(page: Option<i64>) -> i64 {
    match page {
        Some(page) if page >= 1 => page,
        _ => 1,
    }
}

/// Clamp a page size into `[1, 100]`; out-of-range values fall back to
/// the default of 20.
#[must_use]
pub fn normalize_page_size(page_size: Option<i64>) -> i64 {
    match page_size {
        Some(size) if (1..=MAX_PAGE_SIZE).contains(&size) => size,
        _ => DEFAULT_PAGE_SIZE,
    }
}

/// Counts for one batch run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub success: i32,
    pub failure: i32,
}

/// Intake surface used by the HTTP layer, plus the batch driver used by
/// the polling scheduler.
pub struct MessageService {
    store: Arc<dyn MessageStore>,
    dispatcher: Arc<Dispatcher>,
    max_length: usize,
    /// Set in push mode so freshly created messages reach the broker.
    transport: Option<Arc<dyn Transport>>,
}

impl MessageService {
    #[must_use]
    pub fn new(store: Arc<dyn MessageStore>, dispatcher: Arc<Dispatcher>, max_length: usize) -> Self {
        Self {
            store,
            dispatcher,
            max_length,
            transport: None,
        }
    }

    /// Publish newly created messages to the given transport (push
    /// variant).
    #[must_use]
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Validate and persist a new message with `status = pending`.
    ///
    /// # Errors
    ///
    /// `InvalidPhoneNumber` or `ContentTooLong` on validation failure,
    /// `Db` when the insert fails.
    pub async fn create(
        &self,
        phone_number: &str,
        content: &str,
    ) -> Result<Message, CreateMessageError> {
        let phone_number = validation::validate_phone_number(phone_number)
            .ok_or(CreateMessageError::InvalidPhoneNumber)?;

        if !validation::content_within_limit(content, self.max_length) {
            return Err(CreateMessageError::ContentTooLong);
        }

        let message = self
            .store
            .create(NewMessage {
                phone_number: phone_number.to_string(),
                content: content.to_string(),
            })
            .await?;

        if let Some(transport) = &self.transport {
            // The message is already durable in the store; a publish
            // failure delays delivery until the next broker sweep.
            if let Err(error) = transport.publish(&message).await {
                tracing::error!(
                    target: "transport",
                    message_id = %message.id,
                    %error,
                    "failed to publish message, it stays pending in the store"
                );
            }
        }

        Ok(message)
    }

    /// One polling batch: up to `batch_size` pending messages followed by
    /// up to `batch_size` due retries, dispatched sequentially.
    ///
    /// # Errors
    ///
    /// A store read failure fails the whole batch; per-message errors are
    /// counted and logged but do not stop the batch.
    pub async fn process_batch(
        &self,
        batch_size: i64,
        cancel: &CancellationToken,
    ) -> Result<BatchStats, DispatchError> {
        let mut messages = self.store.pending(batch_size).await?;
        messages.extend(self.store.retryable(batch_size).await?);

        if messages.is_empty() {
            tracing::debug!(target: "dispatch", "no messages ready for dispatch");
            return Ok(BatchStats::default());
        }

        tracing::info!(target: "dispatch", count = messages.len(), "processing messages");

        let mut stats = BatchStats::default();
        for message in &messages {
            if cancel.is_cancelled() {
                break;
            }

            match self.dispatcher.dispatch(message, cancel).await {
                Ok(DispatchOutcome::Sent) => stats.success += 1,
                Ok(DispatchOutcome::Retried { .. } | DispatchOutcome::DeadLettered { .. }) => {
                    stats.failure += 1;
                }
                Ok(DispatchOutcome::Skipped) => {}
                Ok(DispatchOutcome::Canceled) => break,
                Err(error) => {
                    stats.failure += 1;
                    tracing::error!(
                        target: "dispatch",
                        message_id = %message.id,
                        %error,
                        "failed to dispatch message"
                    );
                }
            }
        }

        Ok(stats)
    }

    /// Paginated sent messages, most recent first.
    pub async fn sent_messages(
        &self,
        page: Option<i64>,
        page_size: Option<i64>,
    ) -> Result<Vec<Message>, sqlx::Error> {
        let page = normalize_page(page);
        let page_size = normalize_page_size(page_size);
        self.store
            .sent_page(page_size, (page - 1) * page_size)
            .await
    }

    /// Paginated dead-letter records, most recently moved first.
    pub async fn dead_letter_messages(
        &self,
        page: Option<i64>,
        page_size: Option<i64>,
    ) -> Result<Vec<DeadLetterMessage>, sqlx::Error> {
        let page = normalize_page(page);
        let page_size = normalize_page_size(page_size);
        self.store
            .dead_letter_page(page_size, (page - 1) * page_size)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_defaults_and_clamps() {
        assert_eq!(normalize_page(None), 1);
        assert_eq!(normalize_page(Some(0)), 1);
        assert_eq!(normalize_page(Some(-3)), 1);
        assert_eq!(normalize_page(Some(7)), 7);
    }

    #[test]
    fn page_size_defaults_and_clamps() {
        assert_eq!(normalize_page_size(None), 20);
        assert_eq!(normalize_page_size(Some(0)), 20);
        assert_eq!(normalize_page_size(Some(101)), 20);
        assert_eq!(normalize_page_size(Some(100)), 100);
        assert_eq!(normalize_page_size(Some(1)), 1);
    }
}
