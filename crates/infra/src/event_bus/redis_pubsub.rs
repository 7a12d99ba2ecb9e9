//! Redis pub/sub relay bus.
//!
//! Frames are JSON envelopes broadcast on one well-known fan-out channel.
//! Redis pub/sub is not durable — subscribers that are offline miss frames —
//! which matches the relay contract: best-effort, at-most-once, clients
//! fetch current state on connect.

use async_trait::async_trait;
use futures::StreamExt;
use redis::AsyncCommands;
use tokio::sync::mpsc;

use inspecta_events::{EventFrame, MessageBus, RelayError, Subscription};

#[derive(Debug, Clone)]
pub struct RedisPubSubBus {
    client: redis::Client,
    channel: String,
}

impl RedisPubSubBus {
    pub fn new(redis_url: &str, channel: impl Into<String>) -> Result<Self, RelayError> {
        let client =
            redis::Client::open(redis_url).map_err(|e| RelayError::Connection(e.to_string()))?;
        Ok(Self {
            client,
            channel: channel.into(),
        })
    }
}

#[async_trait]
impl MessageBus for RedisPubSubBus {
    async fn publish(&self, frame: EventFrame) -> Result<(), RelayError> {
        let payload =
            serde_json::to_string(&frame).map_err(|e| RelayError::Serialize(e.to_string()))?;

        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| RelayError::Connection(e.to_string()))?;

        let _: i64 = conn
            .publish(&self.channel, payload)
            .await
            .map_err(|e| RelayError::Connection(e.to_string()))?;

        Ok(())
    }

    async fn subscribe(&self) -> Result<Subscription, RelayError> {
        let conn = self
            .client
            .get_async_connection()
            .await
            .map_err(|e| RelayError::Connection(e.to_string()))?;
        let mut pubsub = conn.into_pubsub();
        pubsub
            .subscribe(&self.channel)
            .await
            .map_err(|e| RelayError::Connection(e.to_string()))?;

        let (tx, rx) = mpsc::unbounded_channel();

        // Background task that receives pub/sub messages and forwards them.
        // Undecodable frames are dropped silently; the store remains the
        // source of truth.
        tokio::spawn(async move {
            let mut stream = pubsub.on_message();
            while let Some(msg) = stream.next().await {
                let payload: String = match msg.get_payload() {
                    Ok(p) => p,
                    Err(_) => continue,
                };
                let frame: EventFrame = match serde_json::from_str(&payload) {
                    Ok(f) => f,
                    Err(_) => continue,
                };
                if tx.send(frame).is_err() {
                    return;
                }
            }
        });

        Ok(Subscription::new(rx))
    }
}
