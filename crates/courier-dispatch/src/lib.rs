//! Message dispatch engine for the courier service.
//!
//! The engine drives each message through the `pending → sending → {sent |
//! failed | dead_letter}` state machine: the [`Scheduler`] pulls batches of
//! eligible messages from the store (or a broker pushes them), the
//! [`Dispatcher`] runs a single delivery attempt through the
//! [`WebhookSender`], failures go through the [`RetryPolicy`] and exhausted
//! messages are handed to the dead-letter table. Every lifecycle event is
//! recorded by the [`AuditEmitter`], which never fails its caller.

pub mod audit;
pub mod cache;
pub mod dispatcher;
pub mod error;
pub mod queue_scheduler;
pub mod retry;
pub mod scheduler;
pub mod sender;
pub mod service;
pub mod store;
pub mod transport;
pub mod validation;

pub use audit::AuditEmitter;
pub use cache::MessageCache;
pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use error::{
    CreateMessageError, DispatchError, SchedulerError, TransportError, WebhookError,
};
pub use queue_scheduler::QueueScheduler;
pub use retry::{RetryDecision, RetryPolicy};
pub use scheduler::{DispatchScheduler, Scheduler, SchedulerStatus};
pub use sender::{WebhookConfig, WebhookSender};
pub use service::{BatchStats, MessageService};
pub use store::{MessageStore, PgMessageStore};
pub use transport::{
    DatabaseTransport, HandlerOutcome, MessageHandler, RabbitMqConfig, RabbitTransport,
    Transport, TransportKind,
};
