//! Persistent sorted-set broker (priority queue with visibility timeout).
//!
//! Layout per queue namespace:
//!
//! - `{ns}:queue` — waiting members, scored by priority band + enqueue time
//!   (lower score pops first).
//! - `{ns}:processing` — claimed members, scored by their visibility
//!   deadline. Expired claims are swept back onto the queue, which stands
//!   in for explicit broker-side acknowledgment tracking.
//! - `{ns}:payloads` / `{ns}:scores` — hashes keyed by the deterministic
//!   dedup member (`job:<id>`), so re-publishing the same logical job is a
//!   no-op while it is queued or in flight.
//! - `{ns}:dlq` — list of discarded payloads.
//!
//! A claim is `ZADD NX` into the processing set before the member leaves
//! the queue, so a crash between the two steps leaves the member visible in
//! both sets rather than lost; the sweep resolves it.

use async_trait::async_trait;
use chrono::Utc;
use redis::AsyncCommands;
use std::time::Duration;

use super::{Broker, BrokerError, Delivery, JobMessage, PublishOptions, QueueDepth, Receipt};

/// Spread between priority levels; leaves room for millisecond enqueue
/// times to order members within one priority.
const PRIORITY_BAND: f64 = 1e13;

/// Configuration for [`RedisSortedBroker`].
#[derive(Debug, Clone)]
pub struct SortedBrokerConfig {
    /// Key namespace, e.g. `"inspecta:jobs"`.
    pub namespace: String,
    /// How long a claimed message stays invisible before the sweep returns
    /// it to the queue.
    pub visibility: Duration,
    /// Poll cadence while waiting for work.
    pub poll_interval: Duration,
}

impl Default for SortedBrokerConfig {
    fn default() -> Self {
        Self {
            namespace: "inspecta:jobs".to_string(),
            visibility: Duration::from_secs(60),
            poll_interval: Duration::from_millis(100),
        }
    }
}

pub struct RedisSortedBroker {
    client: redis::Client,
    queue_key: String,
    processing_key: String,
    payload_key: String,
    score_key: String,
    dlq_key: String,
    config: SortedBrokerConfig,
}

impl RedisSortedBroker {
    pub fn new(redis_url: &str, config: SortedBrokerConfig) -> Result<Self, BrokerError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| BrokerError::Connection(e.to_string()))?;
        let ns = &config.namespace;
        Ok(Self {
            queue_key: format!("{ns}:queue"),
            processing_key: format!("{ns}:processing"),
            payload_key: format!("{ns}:payloads"),
            score_key: format!("{ns}:scores"),
            dlq_key: format!("{ns}:dlq"),
            client,
            config,
        })
    }

    async fn conn(&self) -> Result<redis::aio::MultiplexedConnection, BrokerError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))
    }

    fn command_err(e: redis::RedisError) -> BrokerError {
        BrokerError::Command(e.to_string())
    }

    /// Return expired claims to the queue at their original score.
    async fn sweep_expired(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
    ) -> Result<(), BrokerError> {
        let now_ms = Utc::now().timestamp_millis() as f64;
        let expired: Vec<String> = conn
            .zrangebyscore(&self.processing_key, "-inf", now_ms)
            .await
            .map_err(Self::command_err)?;

        for member in expired {
            let score: Option<f64> = conn
                .hget(&self.score_key, &member)
                .await
                .map_err(Self::command_err)?;
            let _: u64 = conn
                .zrem(&self.processing_key, &member)
                .await
                .map_err(Self::command_err)?;
            if let Some(score) = score {
                // NX: keep the earlier entry if a re-publish already queued it.
                let _: u64 = redis::cmd("ZADD")
                    .arg(&self.queue_key)
                    .arg("NX")
                    .arg(score)
                    .arg(&member)
                    .query_async(conn)
                    .await
                    .map_err(Self::command_err)?;
                tracing::warn!(member = %member, "visibility timeout expired, message requeued");
            }
        }
        Ok(())
    }

    /// Claim the head of the queue, if any.
    async fn try_claim(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
    ) -> Result<Option<Delivery>, BrokerError> {
        loop {
            let head: Vec<String> = conn
                .zrange(&self.queue_key, 0, 0)
                .await
                .map_err(Self::command_err)?;
            let Some(member) = head.into_iter().next() else {
                return Ok(None);
            };

            let deadline =
                Utc::now().timestamp_millis() as f64 + self.config.visibility.as_millis() as f64;
            let claimed: u64 = redis::cmd("ZADD")
                .arg(&self.processing_key)
                .arg("NX")
                .arg(deadline)
                .arg(&member)
                .query_async(conn)
                .await
                .map_err(Self::command_err)?;
            let _: u64 = conn
                .zrem(&self.queue_key, &member)
                .await
                .map_err(Self::command_err)?;
            if claimed == 0 {
                // Another consumer parked it first; look at the next head.
                continue;
            }

            let body: Option<Vec<u8>> = conn
                .hget(&self.payload_key, &member)
                .await
                .map_err(Self::command_err)?;
            let Some(body) = body else {
                // Payload gone (acked elsewhere); drop the stray member.
                let _: u64 = conn
                    .zrem(&self.processing_key, &member)
                    .await
                    .map_err(Self::command_err)?;
                continue;
            };

            return Ok(Some(Delivery {
                body,
                receipt: Receipt { token: member },
            }));
        }
    }

    async fn forget(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        member: &str,
    ) -> Result<(), BrokerError> {
        let _: u64 = conn
            .zrem(&self.processing_key, member)
            .await
            .map_err(Self::command_err)?;
        let _: u64 = conn
            .hdel(&self.payload_key, member)
            .await
            .map_err(Self::command_err)?;
        let _: u64 = conn
            .hdel(&self.score_key, member)
            .await
            .map_err(Self::command_err)?;
        Ok(())
    }
}

#[async_trait]
impl Broker for RedisSortedBroker {
    async fn ensure_topology(&self) -> Result<(), BrokerError> {
        // Sorted sets and hashes are created on first write; a connection
        // round-trip is the only meaningful readiness check.
        let mut conn = self.conn().await?;
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(Self::command_err)?;
        Ok(())
    }

    async fn depth(&self) -> Result<QueueDepth, BrokerError> {
        let mut conn = self.conn().await?;
        let pending: u64 = conn
            .zcard(&self.queue_key)
            .await
            .map_err(Self::command_err)?;
        let in_flight: u64 = conn
            .zcard(&self.processing_key)
            .await
            .map_err(Self::command_err)?;
        Ok(QueueDepth { pending, in_flight })
    }

    async fn publish(&self, message: &JobMessage, opts: PublishOptions) -> Result<(), BrokerError> {
        let member = message.dedup_key();
        let body = message.encode()?;
        let score = opts.priority as f64 * PRIORITY_BAND + Utc::now().timestamp_millis() as f64;

        let mut conn = self.conn().await?;
        let fresh: u64 = conn
            .hset_nx(&self.payload_key, &member, body)
            .await
            .map_err(Self::command_err)?;
        if fresh == 0 {
            // Same logical job already queued or in flight.
            return Ok(());
        }
        let _: u64 = conn
            .hset(&self.score_key, &member, score)
            .await
            .map_err(Self::command_err)?;
        let _: u64 = redis::cmd("ZADD")
            .arg(&self.queue_key)
            .arg("NX")
            .arg(score)
            .arg(&member)
            .query_async(&mut conn)
            .await
            .map_err(Self::command_err)?;
        Ok(())
    }

    async fn receive(&self, wait: Duration) -> Result<Option<Delivery>, BrokerError> {
        let mut conn = self.conn().await?;
        let deadline = tokio::time::Instant::now() + wait;

        loop {
            self.sweep_expired(&mut conn).await?;
            if let Some(delivery) = self.try_claim(&mut conn).await? {
                return Ok(Some(delivery));
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(self.config.poll_interval.min(deadline - now)).await;
        }
    }

    async fn ack(&self, receipt: &Receipt) -> Result<(), BrokerError> {
        let mut conn = self.conn().await?;
        self.forget(&mut conn, &receipt.token).await
    }

    async fn nack(&self, receipt: &Receipt, requeue: bool) -> Result<(), BrokerError> {
        let mut conn = self.conn().await?;

        if requeue {
            let score: Option<f64> = conn
                .hget(&self.score_key, &receipt.token)
                .await
                .map_err(Self::command_err)?;
            let _: u64 = conn
                .zrem(&self.processing_key, &receipt.token)
                .await
                .map_err(Self::command_err)?;
            let _: u64 = redis::cmd("ZADD")
                .arg(&self.queue_key)
                .arg("NX")
                .arg(score.unwrap_or(0.0))
                .arg(&receipt.token)
                .query_async(&mut conn)
                .await
                .map_err(Self::command_err)?;
            return Ok(());
        }

        let body: Option<Vec<u8>> = conn
            .hget(&self.payload_key, &receipt.token)
            .await
            .map_err(Self::command_err)?;
        if let Some(body) = body {
            let _: u64 = conn
                .rpush(&self.dlq_key, body)
                .await
                .map_err(Self::command_err)?;
            tracing::warn!(member = %receipt.token, "message dead-lettered");
        }
        self.forget(&mut conn, &receipt.token).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_bands_dominate_enqueue_time() {
        let now = Utc::now().timestamp_millis() as f64;
        let low_priority = 5.0 * PRIORITY_BAND + now;
        // Even a much later enqueue at a better priority sorts first.
        let later_high_priority = 1.0 * PRIORITY_BAND + now + 86_400_000.0;
        assert!(later_high_priority < low_priority);
    }
}
