//! Transport abstraction: how messages reach the dispatch engine.
//!
//! The engine consumes a narrow capability set — publish, consume,
//! close — and is agnostic to polling vs push. Exactly one variant is
//! active per deployment.

mod database;
mod rabbitmq;

pub use database::DatabaseTransport;
pub use rabbitmq::{RabbitMqConfig, RabbitTransport};

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use courier_db::models::Message;

use crate::error::TransportError;

/// The transport variant in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Database,
    RabbitMq,
}

impl TransportKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Database => "database",
            TransportKind::RabbitMq => "rabbitmq",
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the consumer should do with a message after handling it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// Delivered (or already terminal); acknowledge.
    Delivered,
    /// Failed transiently; the transport schedules a redelivery.
    Retry(String),
    /// Failed permanently; the transport records it on its dead-letter
    /// queue and acknowledges.
    DeadLettered(String),
    /// Another worker owns the message; acknowledge.
    Skipped,
}

/// Callback invoked for each consumed message.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: Message, cancel: &CancellationToken) -> HandlerOutcome;
}

/// A source and sink of messages for the dispatch engine.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Make a message available for consumption.
    async fn publish(&self, message: &Message) -> Result<(), TransportError>;

    /// Consume messages until the token is canceled, invoking the
    /// handler for each.
    async fn consume(
        &self,
        handler: Arc<dyn MessageHandler>,
        cancel: CancellationToken,
    ) -> Result<(), TransportError>;

    /// Release transport resources.
    async fn close(&self) -> Result<(), TransportError>;

    fn kind(&self) -> TransportKind;
}
