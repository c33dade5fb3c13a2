//! Delivery ledger — optional idempotency key for push notifications.
//!
//! The insert feed may deliver the same row twice (e.g. around a reconnect).
//! Without a ledger every delivery produces a notification. When enabled, the
//! first handler to claim a message id wins and later deliveries are skipped.
//!
//! Uses Redis `SET NX EX` for atomic claim with automatic TTL expiry.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use uuid::Uuid;

use crate::error::NotifierError;

/// Records which messages already produced a notification.
#[async_trait]
pub trait DeliveryLedger: Send + Sync {
    /// Claim `message_id`. Returns `true` if this is the first claim.
    async fn claim(&self, message_id: Uuid) -> Result<bool, NotifierError>;
}

/// Redis-backed ledger.
#[derive(Clone)]
pub struct RedisLedger {
    redis: ConnectionManager,
    ttl_secs: u64,
}

impl RedisLedger {
    pub fn new(redis: ConnectionManager, ttl_secs: u64) -> Self {
        Self { redis, ttl_secs }
    }

    fn key(message_id: Uuid) -> String {
        format!("notify:message:{}", message_id)
    }
}

#[async_trait]
impl DeliveryLedger for RedisLedger {
    async fn claim(&self, message_id: Uuid) -> Result<bool, NotifierError> {
        let mut redis = self.redis.clone();

        // SET key "1" NX EX ttl
        // Returns Some("OK") if key was set (first delivery)
        // Returns None if key already exists (duplicate)
        let result: Option<String> = redis::cmd("SET")
            .arg(Self::key(message_id))
            .arg("1")
            .arg("NX")
            .arg("EX")
            .arg(self.ttl_secs)
            .query_async(&mut redis)
            .await?;

        Ok(result.is_some())
    }
}
