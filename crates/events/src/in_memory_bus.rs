//! In-memory relay bus for tests/dev and single-process deployments.

use async_trait::async_trait;
use std::sync::Mutex;
use tokio::sync::mpsc;

use crate::bus::{MessageBus, RelayError, Subscription};
use crate::frame::EventFrame;

/// Best-effort in-process fan-out.
///
/// Subscribers that dropped their end are pruned on the next publish.
#[derive(Debug, Default)]
pub struct InMemoryBus {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<EventFrame>>>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn publish(&self, frame: EventFrame) -> Result<(), RelayError> {
        let mut subs = self
            .subscribers
            .lock()
            .map_err(|_| RelayError::Connection("subscriber list poisoned".to_string()))?;

        // Drop any dead subscribers while publishing.
        subs.retain(|tx| tx.send(frame.clone()).is_ok());

        Ok(())
    }

    async fn subscribe(&self) -> Result<Subscription, RelayError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .map_err(|_| RelayError::Connection("subscriber list poisoned".to_string()))?
            .push(tx);
        Ok(Subscription::new(rx))
    }
}
