//! Redis Streams-backed broker (durable, at-least-once delivery).
//!
//! Topology mirrors a topic exchange bound to one durable queue:
//!
//! - **Stream key**: the exchange; `XADD` writes are persistent.
//! - **Consumer group**: the bound durable queue; each entry is delivered
//!   to exactly one consumer in the group.
//! - **`XACK`**: manual acknowledgment; unacknowledged entries are
//!   redelivered via `XAUTOCLAIM` once their idle time passes the
//!   redelivery threshold.
//! - **Dead-letter stream**: entries settled with `nack(requeue = false)`.
//!
//! Depth comes from `XINFO GROUPS`: the group's `lag` is the undelivered
//! backlog, its `pending` count is the in-flight set.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::OnceCell;

use super::{Broker, BrokerError, Delivery, JobMessage, PublishOptions, QueueDepth, Receipt};

/// Configuration for [`RedisStreamBroker`].
#[derive(Debug, Clone)]
pub struct StreamBrokerConfig {
    pub stream_key: String,
    pub group: String,
    /// Unique consumer name within the group (one per worker process).
    pub consumer: String,
    pub dlq_key: String,
    /// Entries fetched per `XREADGROUP`; extras are buffered locally.
    pub prefetch: usize,
    /// Idle time after which an unacknowledged entry is claimed back.
    pub redeliver_after: Duration,
}

impl Default for StreamBrokerConfig {
    fn default() -> Self {
        Self {
            stream_key: "inspecta:jobs".to_string(),
            group: "workers".to_string(),
            consumer: format!("worker-{}", uuid::Uuid::now_v7()),
            dlq_key: "inspecta:jobs:dlq".to_string(),
            prefetch: 2,
            redeliver_after: Duration::from_secs(60),
        }
    }
}

pub struct RedisStreamBroker {
    client: redis::Client,
    config: StreamBrokerConfig,
    topology: OnceCell<()>,
    /// Entries fetched beyond the one being returned, drained first.
    buffer: Mutex<VecDeque<Delivery>>,
}

impl RedisStreamBroker {
    pub fn new(redis_url: &str, config: StreamBrokerConfig) -> Result<Self, BrokerError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| BrokerError::Connection(e.to_string()))?;
        Ok(Self {
            client,
            config,
            topology: OnceCell::new(),
            buffer: Mutex::new(VecDeque::new()),
        })
    }

    async fn conn(&self) -> Result<redis::aio::MultiplexedConnection, BrokerError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))
    }

    /// Parse one stream entry `[id, [field, value, ...]]` into a delivery.
    fn parse_entry(entry: &redis::Value) -> Option<Delivery> {
        let redis::Value::Bulk(parts) = entry else {
            return None;
        };
        let [id, fields] = parts.as_slice() else {
            return None;
        };
        let redis::Value::Data(id) = id else {
            return None;
        };
        let redis::Value::Bulk(fields) = fields else {
            return None;
        };

        let mut body = None;
        for pair in fields.chunks(2) {
            if let [redis::Value::Data(key), redis::Value::Data(value)] = pair {
                if key.as_slice() == b"payload" {
                    body = Some(value.clone());
                }
            }
        }

        Some(Delivery {
            body: body?,
            receipt: Receipt {
                token: String::from_utf8_lossy(id).to_string(),
            },
        })
    }

    fn parse_entries(entries: &redis::Value, into: &mut VecDeque<Delivery>) {
        if let redis::Value::Bulk(entries) = entries {
            for entry in entries {
                if let Some(delivery) = Self::parse_entry(entry) {
                    into.push_back(delivery);
                }
            }
        }
    }

    /// Claim entries another (or a crashed) consumer left unacknowledged
    /// past the redelivery threshold.
    async fn claim_stale(&self) -> Result<VecDeque<Delivery>, BrokerError> {
        let mut conn = self.conn().await?;
        let reply: redis::Value = redis::cmd("XAUTOCLAIM")
            .arg(&self.config.stream_key)
            .arg(&self.config.group)
            .arg(&self.config.consumer)
            .arg(self.config.redeliver_after.as_millis() as u64)
            .arg("0-0")
            .arg("COUNT")
            .arg(self.config.prefetch)
            .query_async(&mut conn)
            .await
            .map_err(|e| BrokerError::Command(format!("XAUTOCLAIM failed: {e}")))?;

        let mut claimed = VecDeque::new();
        // Reply shape: [next-cursor, entries, (deleted-ids)].
        if let redis::Value::Bulk(parts) = &reply {
            if let Some(entries) = parts.get(1) {
                Self::parse_entries(entries, &mut claimed);
            }
        }
        Ok(claimed)
    }

    async fn read_new(&self, wait: Duration) -> Result<VecDeque<Delivery>, BrokerError> {
        let mut conn = self.conn().await?;
        let block_ms = (wait.as_millis() as u64).max(1);
        let reply: redis::Value = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.config.group)
            .arg(&self.config.consumer)
            .arg("COUNT")
            .arg(self.config.prefetch)
            .arg("BLOCK")
            .arg(block_ms)
            .arg("STREAMS")
            .arg(&self.config.stream_key)
            .arg(">")
            .query_async(&mut conn)
            .await
            .map_err(|e| BrokerError::Command(format!("XREADGROUP failed: {e}")))?;

        let mut fetched = VecDeque::new();
        // Nil on block timeout; otherwise [[stream, [entry, ...]], ...].
        if let redis::Value::Bulk(streams) = &reply {
            for stream in streams {
                if let redis::Value::Bulk(parts) = stream {
                    if let Some(entries) = parts.get(1) {
                        Self::parse_entries(entries, &mut fetched);
                    }
                }
            }
        }
        Ok(fetched)
    }
}

#[async_trait]
impl Broker for RedisStreamBroker {
    async fn ensure_topology(&self) -> Result<(), BrokerError> {
        self.topology
            .get_or_try_init(|| async {
                let mut conn = self.conn().await?;
                // MKSTREAM creates the stream with the group; an existing
                // group reports BUSYGROUP, which is the idempotent case.
                let created: Result<String, redis::RedisError> = redis::cmd("XGROUP")
                    .arg("CREATE")
                    .arg(&self.config.stream_key)
                    .arg(&self.config.group)
                    .arg("0")
                    .arg("MKSTREAM")
                    .query_async(&mut conn)
                    .await;
                match created {
                    Ok(_) => Ok(()),
                    Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
                    Err(e) => Err(BrokerError::Topology(e.to_string())),
                }
            })
            .await?;
        Ok(())
    }

    async fn depth(&self) -> Result<QueueDepth, BrokerError> {
        self.ensure_topology().await?;
        let mut conn = self.conn().await?;
        let reply: redis::Value = redis::cmd("XINFO")
            .arg("GROUPS")
            .arg(&self.config.stream_key)
            .query_async(&mut conn)
            .await
            .map_err(|e| BrokerError::Command(format!("XINFO GROUPS failed: {e}")))?;

        let mut depth = QueueDepth::default();
        if let redis::Value::Bulk(groups) = &reply {
            for group in groups {
                let redis::Value::Bulk(fields) = group else {
                    continue;
                };
                let mut name = None;
                let mut pending = 0u64;
                let mut lag = 0u64;
                for pair in fields.chunks(2) {
                    let [redis::Value::Data(key), value] = pair else {
                        continue;
                    };
                    match (key.as_slice(), value) {
                        (b"name", redis::Value::Data(v)) => {
                            name = Some(String::from_utf8_lossy(v).to_string());
                        }
                        (b"pending", redis::Value::Int(v)) => pending = (*v).max(0) as u64,
                        (b"lag", redis::Value::Int(v)) => lag = (*v).max(0) as u64,
                        _ => {}
                    }
                }
                if name.as_deref() == Some(self.config.group.as_str()) {
                    depth = QueueDepth {
                        pending: lag,
                        in_flight: pending,
                    };
                }
            }
        }
        Ok(depth)
    }

    async fn publish(&self, message: &JobMessage, _opts: PublishOptions) -> Result<(), BrokerError> {
        // Streams have no native dedup and no priority; ordering is
        // append order and dedup is handled by the sorted backend or the
        // idempotent job lifecycle.
        self.ensure_topology().await?;
        let payload = message.encode()?;
        let mut conn = self.conn().await?;
        let _id: String = redis::cmd("XADD")
            .arg(&self.config.stream_key)
            .arg("*")
            .arg("dedup")
            .arg(message.dedup_key())
            .arg("payload")
            .arg(payload)
            .query_async(&mut conn)
            .await
            .map_err(|e| BrokerError::Command(format!("XADD failed: {e}")))?;
        Ok(())
    }

    async fn receive(&self, wait: Duration) -> Result<Option<Delivery>, BrokerError> {
        if let Some(buffered) = self.buffer.lock().unwrap().pop_front() {
            return Ok(Some(buffered));
        }

        self.ensure_topology().await?;

        let mut fetched = self.claim_stale().await?;
        if fetched.is_empty() {
            fetched = self.read_new(wait).await?;
        }

        let first = fetched.pop_front();
        if !fetched.is_empty() {
            self.buffer.lock().unwrap().extend(fetched);
        }
        Ok(first)
    }

    async fn ack(&self, receipt: &Receipt) -> Result<(), BrokerError> {
        let mut conn = self.conn().await?;
        let _: u64 = redis::cmd("XACK")
            .arg(&self.config.stream_key)
            .arg(&self.config.group)
            .arg(&receipt.token)
            .query_async(&mut conn)
            .await
            .map_err(|e| BrokerError::Command(format!("XACK failed: {e}")))?;
        Ok(())
    }

    async fn nack(&self, receipt: &Receipt, requeue: bool) -> Result<(), BrokerError> {
        if requeue {
            // Leave the entry pending; XAUTOCLAIM hands it back out once
            // its idle time crosses the redelivery threshold.
            return Ok(());
        }

        let mut conn = self.conn().await?;

        // Copy the entry to the dead-letter stream before acknowledging.
        let reply: redis::Value = redis::cmd("XRANGE")
            .arg(&self.config.stream_key)
            .arg(&receipt.token)
            .arg(&receipt.token)
            .query_async(&mut conn)
            .await
            .map_err(|e| BrokerError::Command(format!("XRANGE failed: {e}")))?;
        let mut entries = VecDeque::new();
        Self::parse_entries(&reply, &mut entries);
        if let Some(entry) = entries.pop_front() {
            let _: String = redis::cmd("XADD")
                .arg(&self.config.dlq_key)
                .arg("*")
                .arg("original_id")
                .arg(&receipt.token)
                .arg("payload")
                .arg(entry.body)
                .query_async(&mut conn)
                .await
                .map_err(|e| BrokerError::Command(format!("DLQ XADD failed: {e}")))?;
            tracing::warn!(entry_id = %receipt.token, "message dead-lettered");
        }

        let _: u64 = redis::cmd("XACK")
            .arg(&self.config.stream_key)
            .arg(&self.config.group)
            .arg(&receipt.token)
            .query_async(&mut conn)
            .await
            .map_err(|e| BrokerError::Command(format!("XACK failed: {e}")))?;
        Ok(())
    }
}
