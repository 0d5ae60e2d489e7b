use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::{AsyncCommands, Script};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

pub const DEFAULT_QUEUE_NAME: &str = "media_pipeline:jobs";

/// Pops up to ARGV[2] messages, bumps their receive count and leases them
/// until ARGV[1] (epoch millis).
const RECEIVE_SCRIPT: &str = r#"
local leased = {}
for i = 1, tonumber(ARGV[2]) do
  local payload = redis.call('RPOP', KEYS[1])
  if not payload then break end
  local envelope = cjson.decode(payload)
  envelope['receive_count'] = (envelope['receive_count'] or 0) + 1
  local encoded = cjson.encode(envelope)
  redis.call('ZADD', KEYS[2], ARGV[1], encoded)
  table.insert(leased, encoded)
end
return leased
"#;

/// Pushes an existing lease's deadline to ARGV[2]. Returns 0 if the lease is gone.
const RENEW_SCRIPT: &str = r#"
if not redis.call('ZSCORE', KEYS[1], ARGV[1]) then return 0 end
redis.call('ZADD', KEYS[1], ARGV[2], ARGV[1])
return 1
"#;

/// Returns 0 if the lease was already gone, 1 if requeued, 2 if dead-lettered.
const RELEASE_SCRIPT: &str = r#"
if redis.call('ZREM', KEYS[1], ARGV[1]) == 0 then return 0 end
local envelope = cjson.decode(ARGV[1])
if (envelope['receive_count'] or 0) >= tonumber(ARGV[2]) then
  redis.call('LPUSH', KEYS[3], ARGV[1])
  return 2
end
redis.call('LPUSH', KEYS[2], ARGV[1])
return 1
"#;

/// Moves leases whose deadline passed ARGV[1] back to pending or to the
/// dead-letter list. Returns {reclaimed, dead_lettered}.
const RECLAIM_SCRIPT: &str = r#"
local expired = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1])
local dead = 0
for _, payload in ipairs(expired) do
  redis.call('ZREM', KEYS[1], payload)
  local envelope = cjson.decode(payload)
  if (envelope['receive_count'] or 0) >= tonumber(ARGV[2]) then
    redis.call('LPUSH', KEYS[3], payload)
    dead = dead + 1
  else
    redis.call('LPUSH', KEYS[2], payload)
  end
end
return {#expired, dead}
"#;

/// Envelope stored in Redis around a raw message body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEnvelope {
    pub id: Uuid,
    pub body: String,
    #[serde(default)]
    pub receive_count: u32,
    pub enqueued_at: DateTime<Utc>,
}

/// A leased message. The body is handed over untouched, even if malformed.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub message_id: Uuid,
    pub body: String,
    pub receive_count: u32,
    receipt: String,
}

impl Delivery {
    fn from_leased(receipt: String) -> Result<Self, QueueError> {
        let envelope: QueueEnvelope = serde_json::from_str(&receipt)?;
        Ok(Self {
            message_id: envelope.id,
            body: envelope.body,
            receive_count: envelope.receive_count,
            receipt,
        })
    }

    /// Build a delivery that did not come from Redis, e.g. for tests or
    /// replaying a dead letter by hand.
    pub fn detached(body: impl Into<String>, receive_count: u32) -> Self {
        let envelope = QueueEnvelope {
            id: Uuid::new_v4(),
            body: body.into(),
            receive_count,
            enqueued_at: Utc::now(),
        };
        let receipt = serde_json::to_string(&envelope).unwrap_or_default();
        Self {
            message_id: envelope.id,
            body: envelope.body,
            receive_count,
            receipt,
        }
    }
}

/// Where a released message ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Requeued,
    DeadLettered,
    /// The lease expired and the message was already reclaimed.
    LeaseLost,
}

/// Redis-backed at-least-once queue with visibility timeouts and a
/// dead-letter list.
pub struct JobQueue {
    client: redis::Client,
    pending_key: String,
    leased_key: String,
    dead_key: String,
    visibility_timeout: Duration,
    max_receive_count: u32,
}

impl JobQueue {
    pub fn new(
        redis_url: &str,
        name: &str,
        visibility_timeout: Duration,
        max_receive_count: u32,
    ) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url).map_err(QueueError::Redis)?;
        Ok(Self {
            client,
            pending_key: format!("{name}:pending"),
            leased_key: format!("{name}:leased"),
            dead_key: format!("{name}:dead"),
            visibility_timeout,
            max_receive_count: max_receive_count.max(1),
        })
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, QueueError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(QueueError::Redis)
    }

    /// Enqueue a raw message body. Returns the message id.
    pub async fn send(&self, body: &str) -> Result<Uuid, QueueError> {
        let envelope = QueueEnvelope {
            id: Uuid::new_v4(),
            body: body.to_string(),
            receive_count: 0,
            enqueued_at: Utc::now(),
        };
        let payload = serde_json::to_string(&envelope)?;

        let mut conn = self.connection().await?;
        conn.lpush::<_, _, ()>(&self.pending_key, &payload)
            .await
            .map_err(QueueError::Redis)?;
        Ok(envelope.id)
    }

    /// Lease up to `max` messages for the visibility timeout.
    pub async fn receive(&self, max: usize) -> Result<Vec<Delivery>, QueueError> {
        let deadline = lease_deadline(Utc::now(), self.visibility_timeout);
        let mut conn = self.connection().await?;

        let leased: Vec<String> = Script::new(RECEIVE_SCRIPT)
            .key(&self.pending_key)
            .key(&self.leased_key)
            .arg(deadline)
            .arg(max.max(1))
            .invoke_async(&mut conn)
            .await
            .map_err(QueueError::Redis)?;

        let (deliveries, undecodable) = split_leased(leased);
        for (receipt, e) in undecodable {
            tracing::error!(error = %e, "Undecodable leased message, moving it to the dead-letter list");
            redis::pipe()
                .atomic()
                .zrem(&self.leased_key, &receipt)
                .ignore()
                .lpush(&self.dead_key, &receipt)
                .ignore()
                .query_async::<()>(&mut conn)
                .await
                .map_err(QueueError::Redis)?;
        }
        Ok(deliveries)
    }

    /// Restart a delivery's visibility timeout from now. Returns false when
    /// the lease already expired and the message was reclaimed.
    pub async fn renew(&self, delivery: &Delivery) -> Result<bool, QueueError> {
        let deadline = lease_deadline(Utc::now(), self.visibility_timeout);
        let mut conn = self.connection().await?;
        let renewed: i64 = Script::new(RENEW_SCRIPT)
            .key(&self.leased_key)
            .arg(&delivery.receipt)
            .arg(deadline)
            .invoke_async(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(renewed == 1)
    }

    /// Acknowledge a delivery so it is never redelivered.
    pub async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        let removed: u64 = conn
            .zrem(&self.leased_key, &delivery.receipt)
            .await
            .map_err(QueueError::Redis)?;

        if removed == 0 {
            tracing::warn!(
                message_id = %delivery.message_id,
                "Acknowledged a message whose lease had already expired"
            );
        }
        Ok(())
    }

    /// Give a delivery back for redelivery, or dead-letter it once it has
    /// been received `max_receive_count` times.
    pub async fn release(&self, delivery: &Delivery) -> Result<ReleaseOutcome, QueueError> {
        let mut conn = self.connection().await?;
        let code: i64 = Script::new(RELEASE_SCRIPT)
            .key(&self.leased_key)
            .key(&self.pending_key)
            .key(&self.dead_key)
            .arg(&delivery.receipt)
            .arg(self.max_receive_count)
            .invoke_async(&mut conn)
            .await
            .map_err(QueueError::Redis)?;

        Ok(match code {
            1 => ReleaseOutcome::Requeued,
            2 => ReleaseOutcome::DeadLettered,
            _ => ReleaseOutcome::LeaseLost,
        })
    }

    /// Return expired leases to the queue. Returns (reclaimed, dead_lettered).
    pub async fn reclaim_expired(&self) -> Result<(u64, u64), QueueError> {
        let now = Utc::now().timestamp_millis();
        let mut conn = self.connection().await?;
        let counts: (u64, u64) = Script::new(RECLAIM_SCRIPT)
            .key(&self.leased_key)
            .key(&self.pending_key)
            .key(&self.dead_key)
            .arg(now)
            .arg(self.max_receive_count)
            .invoke_async(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(counts)
    }

    /// Peek at dead-lettered messages, newest first.
    pub async fn dead_letters(&self, limit: usize) -> Result<Vec<QueueEnvelope>, QueueError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.connection().await?;
        let payloads: Vec<String> = conn
            .lrange(&self.dead_key, 0, limit as isize - 1)
            .await
            .map_err(QueueError::Redis)?;

        Ok(payloads
            .iter()
            .filter_map(|payload| match serde_json::from_str(payload) {
                Ok(envelope) => Some(envelope),
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping undecodable dead letter");
                    None
                }
            })
            .collect())
    }

    /// Check Redis connectivity (for health checks).
    pub async fn health_check(&self) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    /// Number of messages waiting to be received.
    pub async fn depth(&self) -> Result<u64, QueueError> {
        let mut conn = self.connection().await?;
        let depth: u64 = conn.llen(&self.pending_key).await.map_err(QueueError::Redis)?;
        Ok(depth)
    }

    pub async fn in_flight(&self) -> Result<u64, QueueError> {
        let mut conn = self.connection().await?;
        let count: u64 = conn.zcard(&self.leased_key).await.map_err(QueueError::Redis)?;
        Ok(count)
    }

    pub async fn dead_letter_depth(&self) -> Result<u64, QueueError> {
        let mut conn = self.connection().await?;
        let depth: u64 = conn.llen(&self.dead_key).await.map_err(QueueError::Redis)?;
        Ok(depth)
    }
}

/// Lease settlement operations the worker needs, so batch dispatch can run
/// against something other than Redis.
#[async_trait]
pub trait LeaseQueue: Send + Sync {
    async fn renew(&self, delivery: &Delivery) -> Result<bool, QueueError>;
    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError>;
    async fn release(&self, delivery: &Delivery) -> Result<ReleaseOutcome, QueueError>;
}

#[async_trait]
impl LeaseQueue for JobQueue {
    async fn renew(&self, delivery: &Delivery) -> Result<bool, QueueError> {
        JobQueue::renew(self, delivery).await
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        JobQueue::ack(self, delivery).await
    }

    async fn release(&self, delivery: &Delivery) -> Result<ReleaseOutcome, QueueError> {
        JobQueue::release(self, delivery).await
    }
}

/// Decode leased receipts, keeping the ones that fail to decode apart.
fn split_leased(receipts: Vec<String>) -> (Vec<Delivery>, Vec<(String, QueueError)>) {
    let mut deliveries = Vec::with_capacity(receipts.len());
    let mut undecodable = Vec::new();
    for receipt in receipts {
        match Delivery::from_leased(receipt.clone()) {
            Ok(delivery) => deliveries.push(delivery),
            Err(e) => undecodable.push((receipt, e)),
        }
    }
    (deliveries, undecodable)
}

fn lease_deadline(now: DateTime<Utc>, visibility_timeout: Duration) -> i64 {
    now.timestamp_millis() + visibility_timeout.as_millis() as i64
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn lease_deadline_adds_visibility_timeout() {
        let now = Utc.timestamp_millis_opt(1_000).unwrap();
        assert_eq!(lease_deadline(now, Duration::from_secs(300)), 301_000);
    }

    #[test]
    fn delivery_decodes_lua_reencoded_envelope() {
        // cjson escapes forward slashes and reorders keys.
        let receipt = r#"{"receive_count":2,"body":"{\"key\":\"a\/b.txt\"}","id":"67e55044-10b1-426f-9247-bb680e5fe0c8","enqueued_at":"2026-01-02T03:04:05Z"}"#;
        let delivery = Delivery::from_leased(receipt.to_string()).unwrap();

        assert_eq!(delivery.receive_count, 2);
        assert_eq!(delivery.body, r#"{"key":"a/b.txt"}"#);
        assert_eq!(
            delivery.message_id.to_string(),
            "67e55044-10b1-426f-9247-bb680e5fe0c8"
        );
    }

    #[test]
    fn undecodable_receipt_does_not_sink_the_batch() {
        let good = Delivery::detached("body", 1);
        let receipts = vec![
            "{\"id\":\"not-a-uuid\"}".to_string(),
            good.receipt.clone(),
        ];

        let (deliveries, undecodable) = split_leased(receipts);

        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].message_id, good.message_id);
        assert_eq!(undecodable.len(), 1);
        assert_eq!(undecodable[0].0, "{\"id\":\"not-a-uuid\"}");
        assert!(matches!(undecodable[0].1, QueueError::Serialize(_)));
    }

    #[test]
    fn detached_delivery_keeps_raw_body() {
        let delivery = Delivery::detached("not json", 1);
        assert_eq!(delivery.body, "not json");
        assert_eq!(delivery.receive_count, 1);
    }
}
