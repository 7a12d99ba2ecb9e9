//! In-memory broker for tests/dev.
//!
//! Honors the full contract: priority ordering, the deterministic dedup
//! key, and explicit settlement. There is no visibility timeout — an
//! unsettled delivery stays in flight until the process ends, which is the
//! behavior tests want.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

use super::{Broker, BrokerError, Delivery, JobMessage, PublishOptions, QueueDepth, Receipt};

#[derive(Debug, Clone)]
struct QueueEntry {
    member: String,
    priority: i64,
    seq: u64,
}

#[derive(Debug, Default)]
struct Inner {
    /// Waiting entries, kept sorted by `(priority, seq)`.
    queue: Vec<QueueEntry>,
    /// Payload per member, present while waiting or in flight.
    payloads: HashMap<String, (i64, Vec<u8>)>,
    /// Members currently owned by a consumer, keyed by receipt token.
    in_flight: HashMap<String, String>,
    /// Discarded (nack without requeue) payloads.
    dead_letters: Vec<Vec<u8>>,
}

#[derive(Debug, Default)]
pub struct InMemoryBroker {
    inner: Mutex<Inner>,
    notify: Notify,
    seq: AtomicU64,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Discarded payloads, for test assertions.
    pub fn dead_letters(&self) -> Vec<Vec<u8>> {
        self.inner.lock().unwrap().dead_letters.clone()
    }

    fn try_pop(&self) -> Option<Delivery> {
        let mut inner = self.inner.lock().unwrap();
        if inner.queue.is_empty() {
            return None;
        }
        let entry = inner.queue.remove(0);
        let (_, body) = inner
            .payloads
            .get(&entry.member)
            .cloned()
            .unwrap_or_default();
        inner
            .in_flight
            .insert(entry.member.clone(), entry.member.clone());
        Some(Delivery {
            body,
            receipt: Receipt {
                token: entry.member,
            },
        })
    }

    fn insert_sorted(queue: &mut Vec<QueueEntry>, entry: QueueEntry) {
        let at = queue
            .iter()
            .position(|e| (e.priority, e.seq) > (entry.priority, entry.seq))
            .unwrap_or(queue.len());
        queue.insert(at, entry);
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn ensure_topology(&self) -> Result<(), BrokerError> {
        Ok(())
    }

    async fn depth(&self) -> Result<QueueDepth, BrokerError> {
        let inner = self.inner.lock().unwrap();
        Ok(QueueDepth {
            pending: inner.queue.len() as u64,
            in_flight: inner.in_flight.len() as u64,
        })
    }

    async fn publish(&self, message: &JobMessage, opts: PublishOptions) -> Result<(), BrokerError> {
        let member = message.dedup_key();
        let body = message.encode()?;
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.payloads.contains_key(&member) {
                // Same logical job already queued or in flight.
                return Ok(());
            }
            inner.payloads.insert(member.clone(), (opts.priority, body));
            let entry = QueueEntry {
                member,
                priority: opts.priority,
                seq: self.seq.fetch_add(1, Ordering::Relaxed),
            };
            Self::insert_sorted(&mut inner.queue, entry);
        }
        self.notify.notify_waiters();
        Ok(())
    }

    async fn receive(&self, wait: Duration) -> Result<Option<Delivery>, BrokerError> {
        let deadline = Instant::now() + wait;
        loop {
            if let Some(delivery) = self.try_pop() {
                return Ok(Some(delivery));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let _ = tokio::time::timeout(deadline - now, self.notify.notified()).await;
        }
    }

    async fn ack(&self, receipt: &Receipt) -> Result<(), BrokerError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(member) = inner.in_flight.remove(&receipt.token) {
            inner.payloads.remove(&member);
        }
        Ok(())
    }

    async fn nack(&self, receipt: &Receipt, requeue: bool) -> Result<(), BrokerError> {
        {
            let mut inner = self.inner.lock().unwrap();
            let Some(member) = inner.in_flight.remove(&receipt.token) else {
                return Ok(());
            };
            if requeue {
                if let Some((priority, _)) = inner.payloads.get(&member).cloned() {
                    let entry = QueueEntry {
                        member,
                        priority,
                        seq: self.seq.fetch_add(1, Ordering::Relaxed),
                    };
                    Self::insert_sorted(&mut inner.queue, entry);
                }
            } else if let Some((_, body)) = inner.payloads.remove(&member) {
                inner.dead_letters.push(body);
            }
        }
        if requeue {
            self.notify.notify_waiters();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use inspecta_core::{InspectionId, JobId, TenantId};

    fn message() -> JobMessage {
        JobMessage {
            job_id: JobId::new(),
            inspection_id: InspectionId::new(),
            organization_id: TenantId::new(),
            payload: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn publish_then_receive_then_ack_drains_the_queue() {
        let broker = InMemoryBroker::new();
        let msg = message();
        broker.publish(&msg, PublishOptions::default()).await.unwrap();

        assert_eq!(broker.depth().await.unwrap().pending, 1);

        let delivery = broker
            .receive(Duration::from_millis(50))
            .await
            .unwrap()
            .expect("one delivery");
        assert_eq!(delivery.decode().unwrap(), msg);

        let depth = broker.depth().await.unwrap();
        assert_eq!(depth.pending, 0);
        assert_eq!(depth.in_flight, 1);

        broker.ack(&delivery.receipt).await.unwrap();
        assert_eq!(broker.depth().await.unwrap(), QueueDepth::default());
    }

    #[tokio::test]
    async fn lower_priority_value_is_delivered_first() {
        let broker = InMemoryBroker::new();
        let slow = message();
        let fast = message();
        broker
            .publish(&slow, PublishOptions { priority: 5 })
            .await
            .unwrap();
        broker
            .publish(&fast, PublishOptions { priority: 1 })
            .await
            .unwrap();

        let first = broker
            .receive(Duration::from_millis(50))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.decode().unwrap().job_id, fast.job_id);
    }

    #[tokio::test]
    async fn duplicate_publish_of_same_job_is_a_noop() {
        let broker = InMemoryBroker::new();
        let msg = message();
        broker.publish(&msg, PublishOptions::default()).await.unwrap();
        broker.publish(&msg, PublishOptions::default()).await.unwrap();

        assert_eq!(broker.depth().await.unwrap().pending, 1);
    }

    #[tokio::test]
    async fn nack_with_requeue_makes_the_message_deliverable_again() {
        let broker = InMemoryBroker::new();
        let msg = message();
        broker.publish(&msg, PublishOptions::default()).await.unwrap();

        let delivery = broker
            .receive(Duration::from_millis(50))
            .await
            .unwrap()
            .unwrap();
        broker.nack(&delivery.receipt, true).await.unwrap();

        let again = broker
            .receive(Duration::from_millis(50))
            .await
            .unwrap()
            .expect("redelivered");
        assert_eq!(again.decode().unwrap().job_id, msg.job_id);
    }

    #[tokio::test]
    async fn nack_without_requeue_dead_letters_the_message() {
        let broker = InMemoryBroker::new();
        let msg = message();
        broker.publish(&msg, PublishOptions::default()).await.unwrap();

        let delivery = broker
            .receive(Duration::from_millis(50))
            .await
            .unwrap()
            .unwrap();
        broker.nack(&delivery.receipt, false).await.unwrap();

        assert_eq!(broker.depth().await.unwrap(), QueueDepth::default());
        assert_eq!(broker.dead_letters().len(), 1);
        assert!(broker
            .receive(Duration::from_millis(10))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn receive_times_out_when_empty() {
        let broker = InMemoryBroker::new();
        let got = broker.receive(Duration::from_millis(10)).await.unwrap();
        assert!(got.is_none());
    }
}
