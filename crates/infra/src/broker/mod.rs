//! Durable job-message broker abstraction.
//!
//! A broker delivers each published message to exactly one consumer at a
//! time, with explicit acknowledgment. Two interchangeable Redis backends
//! satisfy the contract — a streams/consumer-group backend
//! ([`RedisStreamBroker`]) and a priority sorted-set backend
//! ([`RedisSortedBroker`]) — plus an in-memory backend for tests. Backend
//! choice is a deployment decision (`config::BrokerBackend`); callers only
//! ever see `dyn Broker`.
//!
//! Consumption is pull-shaped: the worker runtime calls [`Broker::receive`]
//! and settles each [`Delivery`] with [`Broker::ack`] / [`Broker::nack`].
//! Prefetch is enforced by the runtime never holding more unacknowledged
//! deliveries than its concurrency budget.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use inspecta_core::{InspectionId, Job, JobId, TenantId};

pub mod memory;
#[cfg(feature = "redis")]
pub mod sorted;
#[cfg(feature = "redis")]
pub mod streams;

pub use memory::InMemoryBroker;
#[cfg(feature = "redis")]
pub use sorted::RedisSortedBroker;
#[cfg(feature = "redis")]
pub use streams::RedisStreamBroker;

/// Broker transport error.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker connection error: {0}")]
    Connection(String),

    #[error("broker command error: {0}")]
    Command(String),

    #[error("broker encode error: {0}")]
    Serialize(String),

    #[error("broker topology error: {0}")]
    Topology(String),
}

/// The persistent wire message referencing one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobMessage {
    pub job_id: JobId,
    pub inspection_id: InspectionId,
    pub organization_id: TenantId,
    pub payload: JsonValue,
}

impl JobMessage {
    pub fn from_job(job: &Job) -> Self {
        Self {
            job_id: job.id,
            inspection_id: job.inspection_id,
            organization_id: job.organization_id,
            payload: job.payload.clone(),
        }
    }

    /// Deterministic dedup key: re-publishing the same logical job maps to
    /// the same member on backends that support dedup keys.
    pub fn dedup_key(&self) -> String {
        format!("job:{}", self.job_id)
    }

    pub fn encode(&self) -> Result<Vec<u8>, BrokerError> {
        serde_json::to_vec(self).map_err(|e| BrokerError::Serialize(e.to_string()))
    }
}

/// Publish-time options.
#[derive(Debug, Clone, Copy, Default)]
pub struct PublishOptions {
    /// Numeric priority hint; lower values are delivered sooner on backends
    /// that order by priority.
    pub priority: i64,
}

/// Current backlog, as used by the backpressure gate and status endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueDepth {
    /// Published, not yet delivered to any consumer.
    pub pending: u64,
    /// Delivered and awaiting acknowledgment.
    pub in_flight: u64,
}

/// Opaque settlement token for one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub token: String,
}

/// One message handed to a consumer, to be settled exactly once.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub body: Vec<u8>,
    pub receipt: Receipt,
}

impl Delivery {
    /// Decode the wire payload. Failure means a poison message: the caller
    /// acks and discards, it is never retried.
    pub fn decode(&self) -> Result<JobMessage, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

/// Publish/consume capability over a durable message channel.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Idempotent setup of the durable channel. Safe to call concurrently;
    /// concurrent callers await the same single-flight initialization.
    async fn ensure_topology(&self) -> Result<(), BrokerError>;

    /// Current backlog size.
    async fn depth(&self) -> Result<QueueDepth, BrokerError>;

    /// Write a persistent message. Survives broker restart.
    async fn publish(&self, message: &JobMessage, opts: PublishOptions) -> Result<(), BrokerError>;

    /// Wait up to `wait` for the next delivery. `None` on timeout.
    async fn receive(&self, wait: Duration) -> Result<Option<Delivery>, BrokerError>;

    /// Settle a delivery as processed.
    async fn ack(&self, receipt: &Receipt) -> Result<(), BrokerError>;

    /// Settle a delivery as not processed. With `requeue` the message
    /// becomes eligible for redelivery; without it the message is discarded
    /// to the backend's dead-letter area.
    async fn nack(&self, receipt: &Receipt, requeue: bool) -> Result<(), BrokerError>;
}

#[async_trait]
impl<B> Broker for Arc<B>
where
    B: Broker + ?Sized,
{
    async fn ensure_topology(&self) -> Result<(), BrokerError> {
        (**self).ensure_topology().await
    }

    async fn depth(&self) -> Result<QueueDepth, BrokerError> {
        (**self).depth().await
    }

    async fn publish(&self, message: &JobMessage, opts: PublishOptions) -> Result<(), BrokerError> {
        (**self).publish(message, opts).await
    }

    async fn receive(&self, wait: Duration) -> Result<Option<Delivery>, BrokerError> {
        (**self).receive(wait).await
    }

    async fn ack(&self, receipt: &Receipt) -> Result<(), BrokerError> {
        (**self).ack(receipt).await
    }

    async fn nack(&self, receipt: &Receipt, requeue: bool) -> Result<(), BrokerError> {
        (**self).nack(receipt, requeue).await
    }
}

/// Backoff policy for transient broker connect failures.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Maximum number of consecutive retry attempts before giving up.
    pub max_attempts: u32,
    /// Base delay between retries.
    pub base_delay: Duration,
    /// Delay cap.
    pub max_delay: Duration,
    /// Jitter factor (0.0-1.0) to spread reconnect storms.
    pub jitter: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter: 0.1,
        }
    }
}

impl ReconnectPolicy {
    /// Exponential delay for a given attempt number (1-indexed), capped at
    /// `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_ms = self.base_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;
        let exp = 2_f64.powi((attempt - 1).min(20) as i32);
        let delay_ms = (base_ms * exp).min(max_ms);

        // Deterministic pseudo-jitter keyed on the attempt number.
        let jitter_range = delay_ms * self.jitter;
        let jitter = if jitter_range > 0.0 {
            let pseudo_random = ((attempt as f64 * 17.0) % 100.0) / 100.0;
            jitter_range * (pseudo_random - 0.5) * 2.0
        } else {
            0.0
        };

        Duration::from_millis((delay_ms + jitter).max(0.0) as u64)
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}
