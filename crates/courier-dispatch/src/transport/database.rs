//! Database-polling transport.
//!
//! The store itself is the queue: intake persists messages as `pending`,
//! and consumption polls for eligible rows on an interval.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use courier_db::models::Message;

use crate::error::TransportError;
use crate::store::MessageStore;
use crate::transport::{MessageHandler, Transport, TransportKind};

/// Polls the message store for pending and retryable messages.
pub struct DatabaseTransport {
    store: Arc<dyn MessageStore>,
    batch_size: i64,
    interval: Duration,
}

impl DatabaseTransport {
    #[must_use]
    pub fn new(store: Arc<dyn MessageStore>, batch_size: i64, interval: Duration) -> Self {
        Self {
            store,
            batch_size,
            interval,
        }
    }

    async fn drain(
        &self,
        handler: &Arc<dyn MessageHandler>,
        cancel: &CancellationToken,
    ) -> Result<(), TransportError> {
        let mut messages = self.store.pending(self.batch_size).await?;
        messages.extend(self.store.retryable(self.batch_size).await?);

        for message in messages {
            if cancel.is_cancelled() {
                break;
            }
            handler.handle(message, cancel).await;
        }

        Ok(())
    }
}

#[async_trait]
impl Transport for DatabaseTransport {
    /// The message was already persisted at intake; the poll loop will
    /// find it.
    async fn publish(&self, _message: &Message) -> Result<(), TransportError> {
        Ok(())
    }

    async fn consume(
        &self,
        handler: Arc<dyn MessageHandler>,
        cancel: CancellationToken,
    ) -> Result<(), TransportError> {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = ticker.tick() => {
                    if let Err(error) = self.drain(&handler, &cancel).await {
                        tracing::error!(
                            target: "transport",
                            %error,
                            "database poll failed"
                        );
                    }
                }
            }
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        Ok(())
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Database
    }
}
