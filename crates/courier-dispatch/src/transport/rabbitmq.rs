//! RabbitMQ transport: durable queues with push consumption.
//!
//! Three durable queues are declared at connect time: pending, retry and
//! dead-letter. Consumers run on pending and retry; on a transient
//! failure the message is republished to the retry queue with a
//! `retry_count` header after a consumer-side backoff sleep, and once the
//! count passes the budget it goes to the dead-letter queue instead.
//! Payloads are persistent (delivery mode 2).

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use lapin::message::Delivery;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
    QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use tokio_util::sync::CancellationToken;

use courier_db::models::Message;

use crate::error::TransportError;
use crate::transport::{HandlerOutcome, MessageHandler, Transport, TransportKind};

/// Broker settings for the push variant.
#[derive(Debug, Clone)]
pub struct RabbitMqConfig {
    pub url: String,
    pub messages_queue: String,
    pub retry_queue: String,
    pub dead_letter_queue: String,
    /// Broker-side retry budget; beyond it messages go to the broker DLQ.
    pub max_retries: u32,
    /// Seconds multiplied by attempt² for the consumer-side backoff.
    pub retry_delay_multiplier: u64,
}

/// RabbitMQ-backed transport.
pub struct RabbitTransport {
    connection: Connection,
    channel: Channel,
    config: RabbitMqConfig,
}

impl RabbitTransport {
    /// Connect and declare the three durable queues.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Broker` when the connection, channel or
    /// queue declarations fail.
    pub async fn connect(config: RabbitMqConfig) -> Result<Self, TransportError> {
        let connection =
            Connection::connect(&config.url, ConnectionProperties::default()).await?;
        let channel = connection.create_channel().await?;

        for queue in [
            &config.messages_queue,
            &config.retry_queue,
            &config.dead_letter_queue,
        ] {
            channel
                .queue_declare(
                    queue,
                    QueueDeclareOptions {
                        durable: true,
                        ..QueueDeclareOptions::default()
                    },
                    FieldTable::default(),
                )
                .await?;
        }

        Ok(Self {
            connection,
            channel,
            config,
        })
    }

    async fn publish_to(
        channel: &Channel,
        queue: &str,
        payload: &[u8],
        headers: Option<FieldTable>,
    ) -> Result<(), TransportError> {
        let mut properties = BasicProperties::default()
            .with_content_type("application/json".into())
            .with_delivery_mode(2);
        if let Some(headers) = headers {
            properties = properties.with_headers(headers);
        }

        channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                payload,
                properties,
            )
            .await?
            .await?;

        Ok(())
    }

    async fn publish_dead_letter(
        &self,
        message: &Message,
        reason: &str,
    ) -> Result<(), TransportError> {
        let payload = serde_json::to_vec(&serde_json::json!({
            "original_message": message,
            "failure_reason": reason,
            "moved_at": Utc::now(),
        }))?;

        Self::publish_to(&self.channel, &self.config.dead_letter_queue, &payload, None).await
    }

    async fn consume_queue(
        &self,
        queue: &str,
        handler: Arc<dyn MessageHandler>,
        cancel: CancellationToken,
    ) -> Result<(), TransportError> {
        let mut consumer = self
            .channel
            .basic_consume(
                queue,
                &format!("courier-{queue}"),
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        loop {
            let delivery = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                delivery = consumer.next() => delivery,
            };

            match delivery {
                None => return Ok(()),
                Some(Err(error)) => {
                    tracing::error!(target: "transport", queue, %error, "consumer stream error");
                    return Err(error.into());
                }
                Some(Ok(delivery)) => {
                    if let Err(error) = self.handle_delivery(delivery, &handler, &cancel).await {
                        tracing::error!(
                            target: "transport",
                            queue,
                            %error,
                            "failed to settle delivery"
                        );
                    }
                }
            }
        }
    }

    async fn handle_delivery(
        &self,
        delivery: Delivery,
        handler: &Arc<dyn MessageHandler>,
        cancel: &CancellationToken,
    ) -> Result<(), TransportError> {
        let message: Message = match serde_json::from_slice(&delivery.data) {
            Ok(message) => message,
            Err(error) => {
                tracing::warn!(
                    target: "transport",
                    %error,
                    "dropping undecodable payload"
                );
                delivery
                    .nack(BasicNackOptions {
                        requeue: false,
                        ..BasicNackOptions::default()
                    })
                    .await?;
                return Ok(());
            }
        };

        match handler.handle(message.clone(), cancel).await {
            HandlerOutcome::Delivered | HandlerOutcome::Skipped => {}
            HandlerOutcome::DeadLettered(reason) => {
                self.publish_dead_letter(&message, &reason).await?;
            }
            HandlerOutcome::Retry(reason) => {
                let retry_count = retry_count_from(&delivery) + 1;
                if retry_count > self.config.max_retries {
                    self.publish_dead_letter(
                        &message,
                        &format!("max retries exceeded: {reason}"),
                    )
                    .await?;
                } else {
                    self.schedule_broker_retry(&message, retry_count, cancel)?;
                }
            }
        }

        delivery.ack(BasicAckOptions::default()).await?;
        Ok(())
    }

    /// Sleep the backoff on the consumer side, then republish with the
    /// bumped `retry_count` header. The original delivery is acked
    /// immediately so the queue is not blocked while we wait.
    fn schedule_broker_retry(
        &self,
        message: &Message,
        retry_count: u32,
        cancel: &CancellationToken,
    ) -> Result<(), TransportError> {
        let payload = serde_json::to_vec(message)?;
        let channel = self.channel.clone();
        let queue = self.config.retry_queue.clone();
        let cancel = cancel.clone();
        let message_id = message.id;

        let delay_secs =
            u64::from(retry_count) * u64::from(retry_count) * self.config.retry_delay_multiplier;
        let delay = std::time::Duration::from_secs(delay_secs);

        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }

            let mut headers = FieldTable::default();
            headers.insert("retry_count".into(), AMQPValue::LongInt(retry_count as i32));

            if let Err(error) =
                Self::publish_to(&channel, &queue, &payload, Some(headers)).await
            {
                tracing::error!(
                    target: "transport",
                    %message_id,
                    %error,
                    "failed to republish message to retry queue"
                );
            }
        });

        Ok(())
    }
}

fn retry_count_from(delivery: &Delivery) -> u32 {
    delivery
        .properties
        .headers()
        .as_ref()
        .and_then(|table| {
            table
                .inner()
                .iter()
                .find(|(key, _)| key.as_str() == "retry_count")
                .map(|(_, value)| value)
        })
        .and_then(|value| match value {
            AMQPValue::ShortShortInt(n) => u32::try_from(*n).ok(),
            AMQPValue::ShortInt(n) => u32::try_from(*n).ok(),
            AMQPValue::LongInt(n) => u32::try_from(*n).ok(),
            AMQPValue::LongLongInt(n) => u32::try_from(*n).ok(),
            _ => None,
        })
        .unwrap_or(0)
}

#[async_trait]
impl Transport for RabbitTransport {
    async fn publish(&self, message: &Message) -> Result<(), TransportError> {
        let payload = serde_json::to_vec(message)?;
        Self::publish_to(&self.channel, &self.config.messages_queue, &payload, None).await
    }

    /// Consume the pending and retry queues until canceled.
    async fn consume(
        &self,
        handler: Arc<dyn MessageHandler>,
        cancel: CancellationToken,
    ) -> Result<(), TransportError> {
        let pending = self.consume_queue(
            &self.config.messages_queue,
            handler.clone(),
            cancel.clone(),
        );
        let retry = self.consume_queue(&self.config.retry_queue, handler, cancel);

        let (pending, retry) = tokio::join!(pending, retry);
        pending.and(retry)
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.connection.close(200, "shutting down").await?;
        Ok(())
    }

    fn kind(&self) -> TransportKind {
        TransportKind::RabbitMq
    }
}
