//! Relay bus contract (mechanics only).
//!
//! The bus is intentionally lightweight and transport-agnostic: in-memory
//! channels for a single process, Redis pub/sub across processes. It is for
//! distribution, not storage — the Job Store remains the source of truth,
//! so a dropped frame costs a live update, never data.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::frame::EventFrame;

/// Relay transport error.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("relay connection error: {0}")]
    Connection(String),

    #[error("relay encode error: {0}")]
    Serialize(String),

    #[error("relay subscription closed")]
    Closed,
}

/// A subscription to the relay channel.
///
/// Frames are received in publish order per publisher; ordering between
/// publishers is whatever the transport provides.
#[derive(Debug)]
pub struct Subscription {
    receiver: mpsc::UnboundedReceiver<EventFrame>,
}

impl Subscription {
    pub fn new(receiver: mpsc::UnboundedReceiver<EventFrame>) -> Self {
        Self { receiver }
    }

    /// Wait for the next frame. `None` means the bus side hung up.
    pub async fn recv(&mut self) -> Option<EventFrame> {
        self.receiver.recv().await
    }

    /// Wait for the next frame, bounded by `timeout`.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Result<EventFrame, RelayError> {
        match tokio::time::timeout(timeout, self.receiver.recv()).await {
            Ok(Some(frame)) => Ok(frame),
            Ok(None) => Err(RelayError::Closed),
            Err(_) => Err(RelayError::Connection("recv timed out".to_string())),
        }
    }

    /// Non-blocking poll, mostly for tests.
    pub fn try_recv(&mut self) -> Option<EventFrame> {
        self.receiver.try_recv().ok()
    }
}

/// Fan-out publish/subscribe over [`EventFrame`]s.
///
/// Publishing is best-effort, at-most-once. Subscribers receive every frame
/// published after they subscribed; there is no replay.
#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish(&self, frame: EventFrame) -> Result<(), RelayError>;

    async fn subscribe(&self) -> Result<Subscription, RelayError>;
}

#[async_trait]
impl<B> MessageBus for Arc<B>
where
    B: MessageBus + ?Sized,
{
    async fn publish(&self, frame: EventFrame) -> Result<(), RelayError> {
        (**self).publish(frame).await
    }

    async fn subscribe(&self) -> Result<Subscription, RelayError> {
        (**self).subscribe().await
    }
}
