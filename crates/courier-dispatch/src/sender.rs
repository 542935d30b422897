//! Webhook sender: one outbound POST with internal retry.

use std::time::{Duration, Instant};

use chrono::Utc;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::audit::AuditEmitter;
use crate::error::WebhookError;

/// Header carrying the shared secret on outbound webhook calls.
pub const AUTH_HEADER: &str = "x-ins-auth-key";

/// Settings for the webhook sender.
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub url: String,
    pub auth_key: String,
    /// Per-request timeout, applied by the shared HTTP client.
    pub timeout: Duration,
    /// Re-attempts after the first try. These are per-call retries and do
    /// not touch the message-level retry counter.
    pub max_retries: u32,
}

#[derive(Debug, Serialize)]
struct WebhookRequest<'a> {
    to: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct WebhookAck {
    #[allow(dead_code)]
    message: Option<String>,
    #[serde(rename = "messageId")]
    message_id: String,
}

/// Sends messages to the configured webhook endpoint.
///
/// The HTTP client is shared and safe for concurrent use. Each call makes
/// up to `max_retries + 1` tries with a linear backoff of `attempt · 1s`
/// between them, honoring cancellation between and during attempts. A
/// non-JSON success body gets a synthesized remote id — the endpoint may
/// be a sink that does not echo ids.
pub struct WebhookSender {
    client: reqwest::Client,
    url: String,
    auth_key: String,
    max_retries: u32,
    audit: Option<AuditEmitter>,
}

impl WebhookSender {
    /// Build a sender with a client configured once with the timeout.
    ///
    /// # Errors
    ///
    /// Returns `WebhookError::Client` if the HTTP client cannot be built.
    pub fn new(config: WebhookConfig) -> Result<Self, WebhookError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(WebhookError::Client)?;

        Ok(Self {
            client,
            url: config.url,
            auth_key: config.auth_key,
            max_retries: config.max_retries,
            audit: None,
        })
    }

    /// Attach an audit emitter for webhook request/response events.
    #[must_use]
    pub fn with_audit(mut self, audit: AuditEmitter) -> Self {
        self.audit = Some(audit);
        self
    }

    /// The configured endpoint URL.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.url
    }

    /// Deliver one message, returning the remote id on success.
    ///
    /// # Errors
    ///
    /// `WebhookError::Canceled` when the token fires, or
    /// `WebhookError::Exhausted` once every try has failed.
    pub async fn send(
        &self,
        message_id: Uuid,
        to: &str,
        content: &str,
        cancel: &CancellationToken,
    ) -> Result<String, WebhookError> {
        let payload = WebhookRequest { to, content };
        let mut last_error = WebhookError::Transport("no attempt made".to_string());

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = Duration::from_secs(u64::from(attempt));
                tokio::select! {
                    _ = cancel.cancelled() => return Err(WebhookError::Canceled),
                    _ = tokio::time::sleep(backoff) => {}
                }
            }

            if let Some(audit) = &self.audit {
                audit.webhook_request(message_id, &self.url);
            }

            let started = Instant::now();
            let result = tokio::select! {
                _ = cancel.cancelled() => return Err(WebhookError::Canceled),
                result = self.attempt(&payload) => result,
            };
            let elapsed = started.elapsed();

            match result {
                Ok((status, remote_id)) => {
                    if let Some(audit) = &self.audit {
                        audit.webhook_response(message_id, &self.url, i32::from(status), elapsed);
                    }
                    return Ok(remote_id);
                }
                Err(error) => {
                    let status = match &error {
                        WebhookError::BadStatus(code) => i32::from(*code),
                        _ => 0,
                    };
                    if let Some(audit) = &self.audit {
                        audit.webhook_response(message_id, &self.url, status, elapsed);
                    }
                    tracing::warn!(
                        target: "webhook",
                        %message_id,
                        attempt = attempt + 1,
                        %error,
                        "webhook attempt failed"
                    );
                    last_error = error;
                }
            }
        }

        Err(WebhookError::Exhausted {
            attempts: self.max_retries + 1,
            source: Box::new(last_error),
        })
    }

    async fn attempt(&self, payload: &WebhookRequest<'_>) -> Result<(u16, String), WebhookError> {
        let response = self
            .client
            .post(&self.url)
            .header(AUTH_HEADER, &self.auth_key)
            .json(payload)
            .send()
            .await
            .map_err(|e| WebhookError::Transport(e.to_string()))?;

        let status = response.status();
        if status != StatusCode::OK && status != StatusCode::ACCEPTED {
            return Err(WebhookError::BadStatus(status.as_u16()));
        }

        let remote_id = match response.json::<WebhookAck>().await {
            Ok(ack) => ack.message_id,
            Err(_) => {
                let synthesized = format!(
                    "webhook-{}",
                    Utc::now().timestamp_nanos_opt().unwrap_or_default()
                );
                tracing::debug!(
                    target: "webhook",
                    remote_id = %synthesized,
                    "webhook returned a non-JSON body, synthesizing remote id"
                );
                synthesized
            }
        };

        Ok((status.as_u16(), remote_id))
    }
}
