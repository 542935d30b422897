//! Error types for the dispatch engine.

use thiserror::Error;

/// Errors surfaced by the webhook sender.
#[derive(Debug, Error)]
pub enum WebhookError {
    /// The shared HTTP client could not be built.
    #[error("failed to build webhook http client: {0}")]
    Client(#[source] reqwest::Error),

    /// Connection failure or timeout on a single attempt.
    #[error("webhook request failed: {0}")]
    Transport(String),

    /// The endpoint answered with something other than 200 or 202.
    #[error("webhook returned unexpected status {0}")]
    BadStatus(u16),

    /// The surrounding operation was canceled between or during attempts.
    #[error("webhook call canceled")]
    Canceled,

    /// All attempts were used up; carries the last per-attempt error.
    #[error("webhook failed after {attempts} attempts: {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: Box<WebhookError>,
    },
}

impl WebhookError {
    /// Whether the call ended because the cancellation token fired.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        matches!(self, WebhookError::Canceled)
    }
}

/// Errors from a dispatch attempt or a batch run.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

/// Errors from message intake.
#[derive(Debug, Error)]
pub enum CreateMessageError {
    #[error("invalid phone number format")]
    InvalidPhoneNumber,

    #[error("message content exceeds maximum length")]
    ContentTooLong,

    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

/// Errors from scheduler control operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("scheduler is already running")]
    AlreadyRunning,

    #[error("scheduler is not running")]
    NotRunning,

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Errors from the transport layer.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("broker error: {0}")]
    Broker(#[from] lapin::Error),

    #[error("failed to encode message payload: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}
