//! Optional write-through cache of delivery metadata.
//!
//! Non-authoritative: nothing reads it on the dispatch path, and every
//! failure is logged and swallowed.

use std::time::Duration;

use chrono::Utc;
use redis::AsyncCommands;

use courier_db::models::Message;

/// Redis-backed cache of the last successful delivery per remote id.
#[derive(Clone)]
pub struct MessageCache {
    conn: redis::aio::ConnectionManager,
    ttl: Duration,
}

impl MessageCache {
    /// Connect and verify the server is reachable.
    ///
    /// # Errors
    ///
    /// Returns the underlying redis error when the URL is invalid or the
    /// server cannot be reached.
    pub async fn connect(url: &str, ttl: Duration) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self { conn, ttl })
    }

    /// Record delivery metadata keyed by remote id. Best effort.
    pub async fn store_delivery(&self, remote_id: &str, message: &Message) {
        let record = serde_json::json!({
            "remote_id": remote_id,
            "message_id": message.id,
            "phone_number": message.phone_number,
            "sent_at": Utc::now(),
            "status_code": 202,
        });

        let key = format!("message:{remote_id}");
        let mut conn = self.conn.clone();
        let result: Result<(), redis::RedisError> = conn
            .set_ex(key, record.to_string(), self.ttl.as_secs())
            .await;

        if let Err(error) = result {
            tracing::warn!(
                target: "cache",
                remote_id,
                %error,
                "failed to write delivery record to cache"
            );
        }
    }

    /// Whether the cache currently answers a PING.
    pub async fn ping(&self) -> bool {
        let mut conn = self.conn.clone();
        let result: Result<String, redis::RedisError> =
            redis::cmd("PING").query_async(&mut conn).await;
        result.is_ok()
    }
}
