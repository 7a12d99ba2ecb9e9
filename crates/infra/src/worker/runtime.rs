//! The worker loop: pull deliveries, execute handlers, settle messages.
//!
//! Per message the state machine is `received -> handler running -> ack |
//! nack(requeue = false)`. Up to `concurrency` handlers run in parallel per
//! process; because a permit must be free before the next `receive`, the
//! process never holds more unacknowledged deliveries than its concurrency
//! budget, which is the prefetch guarantee the broker contract asks for.
//! Multiple processes may run against the same durable queue — the broker's
//! group/visibility mechanics keep each message owned by exactly one
//! in-flight handler.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::broker::{Broker, Delivery, ReconnectPolicy};
use crate::jobs::{JobStore, JobStoreError};

use super::handler::{HandlerContext, JobHandler, StoreProgressReporter};

/// Worker runtime configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Concurrent handler executions per process.
    pub concurrency: usize,
    /// How long one `receive` call blocks before re-checking shutdown.
    pub receive_wait: Duration,
    /// Backoff for transient broker receive failures.
    pub reconnect: ReconnectPolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            receive_wait: Duration::from_secs(5),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

/// Pulls jobs from the broker and drives registered handlers.
pub struct WorkerRuntime {
    broker: Arc<dyn Broker>,
    store: Arc<dyn JobStore>,
    handlers: HashMap<String, Arc<dyn JobHandler>>,
    config: WorkerConfig,
}

impl WorkerRuntime {
    pub fn new(broker: Arc<dyn Broker>, store: Arc<dyn JobStore>, config: WorkerConfig) -> Self {
        Self {
            broker,
            store,
            handlers: HashMap::new(),
            config,
        }
    }

    /// Register a handler under its job type.
    pub fn register(&mut self, handler: Arc<dyn JobHandler>) {
        self.handlers
            .insert(handler.job_type().to_string(), handler);
    }

    /// Run until the token is cancelled, then drain in-flight handlers.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(
            concurrency = self.config.concurrency,
            handlers = self.handlers.len(),
            "worker runtime started",
        );

        if let Err(e) = self.broker.ensure_topology().await {
            tracing::error!(error = %e, "broker topology setup failed at startup");
        }

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let mut receive_failures = 0u32;

        loop {
            let permit = tokio::select! {
                _ = cancel.cancelled() => break,
                permit = semaphore.clone().acquire_owned() => {
                    permit.expect("worker semaphore never closes")
                }
            };

            let received = tokio::select! {
                _ = cancel.cancelled() => {
                    drop(permit);
                    break;
                }
                received = self.broker.receive(self.config.receive_wait) => received,
            };

            match received {
                Ok(Some(delivery)) => {
                    receive_failures = 0;
                    let broker = self.broker.clone();
                    let store = self.store.clone();
                    // The handler is resolved inside the task once the
                    // payload decodes, so the registry travels with it.
                    let handlers = self.handlers.clone();
                    tokio::spawn(async move {
                        process_delivery(broker, store, handlers, delivery).await;
                        drop(permit);
                    });
                }
                Ok(None) => {
                    receive_failures = 0;
                    drop(permit);
                }
                Err(e) => {
                    drop(permit);
                    receive_failures += 1;
                    let policy = &self.config.reconnect;
                    if !policy.should_retry(receive_failures) {
                        tracing::error!(
                            error = %e,
                            attempts = receive_failures,
                            "broker receive kept failing, giving up",
                        );
                        break;
                    }
                    let delay = policy.delay_for_attempt(receive_failures);
                    tracing::warn!(
                        error = %e,
                        attempt = receive_failures,
                        delay_ms = delay.as_millis() as u64,
                        "broker receive failed, backing off",
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        // Drain: every permit back means every in-flight handler settled.
        let _ = semaphore
            .acquire_many(self.config.concurrency as u32)
            .await;
        tracing::info!("worker runtime stopped");
    }
}

/// Handle one delivery end to end. Settlement rules:
///
/// - undecodable payload: poison, ack and discard, never retried;
/// - unknown job id: ack and discard (the record is gone, nothing to run);
/// - job already terminal: ack and skip (e.g. cancelled while queued);
/// - handler `Ok`: ack — the handler already owns the `completed` write;
/// - handler `Err`: record via `mark_failed`, then nack without requeue.
async fn process_delivery(
    broker: Arc<dyn Broker>,
    store: Arc<dyn JobStore>,
    handlers: HashMap<String, Arc<dyn JobHandler>>,
    delivery: Delivery,
) {
    let message = match delivery.decode() {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!(error = %e, "discarding undecodable message");
            settle_ack(&broker, &delivery).await;
            return;
        }
    };

    let job = match store.get(message.job_id).await {
        Ok(job) => job,
        Err(JobStoreError::NotFound(id)) => {
            tracing::warn!(job_id = %id, "message references a missing job, discarding");
            settle_ack(&broker, &delivery).await;
            return;
        }
        Err(e) => {
            // Store unavailable: leave the message for redelivery.
            tracing::error!(job_id = %message.job_id, error = %e, "job store unavailable");
            if let Err(e) = broker.nack(&delivery.receipt, true).await {
                tracing::error!(error = %e, "nack failed");
            }
            return;
        }
    };

    if job.status.is_terminal() {
        tracing::info!(job_id = %job.id, status = %job.status, "job already terminal, skipping");
        settle_ack(&broker, &delivery).await;
        return;
    }

    let Some(handler) = handlers.get(&job.job_type).cloned() else {
        let error = format!("no handler registered for job type \"{}\"", job.job_type);
        tracing::error!(job_id = %job.id, "{error}");
        if let Err(e) = store.mark_failed(job.id, &error).await {
            tracing::error!(job_id = %job.id, error = %e, "failed to record missing handler");
        }
        settle_nack(&broker, &delivery).await;
        return;
    };

    if let Err(e) = store
        .update_progress(
            job.id,
            inspecta_core::ProgressUpdate {
                status: Some(inspecta_core::JobStatus::Processing),
                message: Some("processing started".to_string()),
                ..Default::default()
            },
        )
        .await
    {
        tracing::error!(job_id = %job.id, error = %e, "could not mark job processing");
        if let Err(e) = broker.nack(&delivery.receipt, true).await {
            tracing::error!(error = %e, "nack failed");
        }
        return;
    }

    let ctx = HandlerContext {
        job_id: job.id,
        inspection_id: job.inspection_id,
        organization_id: job.organization_id,
        payload: message.payload,
    };
    let reporter = StoreProgressReporter::new(store.clone(), job.id);

    match handler.run(ctx, &reporter).await {
        Ok(()) => {
            tracing::info!(job_id = %job.id, job_type = %job.job_type, "job finished");
            settle_ack(&broker, &delivery).await;
        }
        Err(failure) => {
            tracing::warn!(
                job_id = %job.id,
                job_type = %job.job_type,
                error = %failure,
                "handler failed",
            );
            if let Err(e) = store.mark_failed(job.id, &failure.message).await {
                tracing::error!(job_id = %job.id, error = %e, "failed to record handler failure");
            }
            settle_nack(&broker, &delivery).await;
        }
    }
}

async fn settle_ack(broker: &Arc<dyn Broker>, delivery: &Delivery) {
    if let Err(e) = broker.ack(&delivery.receipt).await {
        tracing::error!(error = %e, "ack failed");
    }
}

async fn settle_nack(broker: &Arc<dyn Broker>, delivery: &Delivery) {
    if let Err(e) = broker.nack(&delivery.receipt, false).await {
        tracing::error!(error = %e, "nack failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::Value as JsonValue;

    use inspecta_core::{InspectionId, JobStatus, NewJob, TenantId};
    use inspecta_events::InMemoryBus;

    use crate::broker::{InMemoryBroker, JobMessage, PublishOptions, Receipt};
    use crate::jobs::InMemoryJobStore;
    use crate::worker::handler::{HandlerFailure, ProgressReport, ProgressReporter};

    struct SucceedingHandler {
        store: Arc<dyn JobStore>,
    }

    #[async_trait]
    impl JobHandler for SucceedingHandler {
        fn job_type(&self) -> &'static str {
            "test_ok"
        }

        async fn run(
            &self,
            ctx: HandlerContext,
            progress: &dyn ProgressReporter,
        ) -> Result<(), HandlerFailure> {
            progress
                .report(ProgressReport::new(50, "halfway"))
                .await
                .map_err(|e| HandlerFailure::new(e.to_string()))?;
            self.store
                .mark_completed(ctx.job_id, JsonValue::Null, "done")
                .await
                .map_err(|e| HandlerFailure::new(e.to_string()))?;
            Ok(())
        }
    }

    struct FailingHandler;

    #[async_trait]
    impl JobHandler for FailingHandler {
        fn job_type(&self) -> &'static str {
            "test_fail"
        }

        async fn run(
            &self,
            _ctx: HandlerContext,
            _progress: &dyn ProgressReporter,
        ) -> Result<(), HandlerFailure> {
            Err(HandlerFailure::new("synthetic handler failure"))
        }
    }

    struct Fixture {
        broker: Arc<InMemoryBroker>,
        store: Arc<InMemoryJobStore>,
    }

    fn fixture() -> Fixture {
        Fixture {
            broker: Arc::new(InMemoryBroker::new()),
            store: Arc::new(InMemoryJobStore::new(Arc::new(InMemoryBus::new()))),
        }
    }

    async fn enqueue(f: &Fixture, job_type: &str) -> inspecta_core::Job {
        let job = f
            .store
            .create(NewJob {
                inspection_id: InspectionId::new(),
                organization_id: TenantId::new(),
                job_type: job_type.to_string(),
                payload: JsonValue::Null,
                total_units: 1,
                created_by: None,
            })
            .await
            .unwrap();
        f.store.mark_queued(job.id, None).await.unwrap();
        f.broker
            .publish(&JobMessage::from_job(&job), PublishOptions::default())
            .await
            .unwrap();
        job
    }

    async fn run_until_terminal(runtime: &WorkerRuntime, f: &Fixture, id: inspecta_core::JobId) {
        let cancel = CancellationToken::new();
        let guard = cancel.clone();
        let run = async { runtime.run(cancel).await };
        let wait = async {
            loop {
                let job = f.store.get(id).await.unwrap();
                if job.status.is_terminal() {
                    guard.cancel();
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        };
        tokio::time::timeout(Duration::from_secs(5), async {
            tokio::join!(run, wait);
        })
        .await
        .expect("job should reach a terminal state");
    }

    fn runtime(f: &Fixture) -> WorkerRuntime {
        let mut runtime = WorkerRuntime::new(
            f.broker.clone(),
            f.store.clone(),
            WorkerConfig {
                receive_wait: Duration::from_millis(20),
                ..Default::default()
            },
        );
        runtime.register(Arc::new(SucceedingHandler {
            store: f.store.clone(),
        }));
        runtime.register(Arc::new(FailingHandler));
        runtime
    }

    #[tokio::test]
    async fn successful_job_is_acked_and_completed() {
        let f = fixture();
        let job = enqueue(&f, "test_ok").await;
        let rt = runtime(&f);

        run_until_terminal(&rt, &f, job.id).await;

        let done = f.store.get(job.id).await.unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.attempts, 1);
        assert_eq!(f.broker.depth().await.unwrap().in_flight, 0);
        assert!(f.broker.dead_letters().is_empty());
    }

    #[tokio::test]
    async fn failing_handler_records_error_and_dead_letters() {
        let f = fixture();
        let job = enqueue(&f, "test_fail").await;
        let rt = runtime(&f);

        run_until_terminal(&rt, &f, job.id).await;

        let failed = f.store.get(job.id).await.unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(
            failed.last_error.as_deref(),
            Some("synthetic handler failure")
        );
        // No transport-level retry: the message went to the dead letters.
        assert_eq!(f.broker.dead_letters().len(), 1);
        assert_eq!(f.broker.depth().await.unwrap().pending, 0);
    }

    #[tokio::test]
    async fn unregistered_job_type_fails_the_job() {
        let f = fixture();
        let job = enqueue(&f, "unknown_type").await;
        let rt = runtime(&f);

        run_until_terminal(&rt, &f, job.id).await;

        let failed = f.store.get(job.id).await.unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert!(failed.last_error.unwrap().contains("no handler registered"));
    }

    #[tokio::test]
    async fn poison_message_is_discarded_without_touching_jobs() {
        let f = fixture();
        // Push garbage straight into the broker.
        let msg = JobMessage {
            job_id: inspecta_core::JobId::new(),
            inspection_id: InspectionId::new(),
            organization_id: TenantId::new(),
            payload: JsonValue::Null,
        };
        f.broker.publish(&msg, PublishOptions::default()).await.unwrap();
        // Corrupt the in-flight body by re-delivering a truncated copy.
        let delivery = f
            .broker
            .receive(Duration::from_millis(20))
            .await
            .unwrap()
            .unwrap();
        let corrupt = crate::broker::Delivery {
            body: delivery.body[..4].to_vec(),
            receipt: Receipt {
                token: delivery.receipt.token.clone(),
            },
        };

        process_delivery(
            f.broker.clone() as Arc<dyn Broker>,
            f.store.clone() as Arc<dyn JobStore>,
            HashMap::new(),
            corrupt,
        )
        .await;

        // Acked away; nothing pending, nothing dead-lettered.
        let depth = f.broker.depth().await.unwrap();
        assert_eq!(depth.pending, 0);
        assert_eq!(depth.in_flight, 0);
    }

    #[tokio::test]
    async fn message_for_missing_job_is_acked_away() {
        let f = fixture();
        let msg = JobMessage {
            job_id: inspecta_core::JobId::new(),
            inspection_id: InspectionId::new(),
            organization_id: TenantId::new(),
            payload: JsonValue::Null,
        };
        f.broker.publish(&msg, PublishOptions::default()).await.unwrap();
        let delivery = f
            .broker
            .receive(Duration::from_millis(20))
            .await
            .unwrap()
            .unwrap();

        process_delivery(
            f.broker.clone() as Arc<dyn Broker>,
            f.store.clone() as Arc<dyn JobStore>,
            HashMap::new(),
            delivery,
        )
        .await;

        assert_eq!(f.broker.depth().await.unwrap().in_flight, 0);
    }

    #[tokio::test]
    async fn cancelled_job_is_skipped_not_run() {
        let f = fixture();
        let job = enqueue(&f, "test_ok").await;
        f.store.mark_cancelled(job.id, "operator cancel").await.unwrap();

        let delivery = f
            .broker
            .receive(Duration::from_millis(20))
            .await
            .unwrap()
            .unwrap();
        let mut handlers: HashMap<String, Arc<dyn JobHandler>> = HashMap::new();
        handlers.insert(
            "test_ok".to_string(),
            Arc::new(SucceedingHandler {
                store: f.store.clone(),
            }),
        );

        process_delivery(
            f.broker.clone() as Arc<dyn Broker>,
            f.store.clone() as Arc<dyn JobStore>,
            handlers,
            delivery,
        )
        .await;

        let record = f.store.get(job.id).await.unwrap();
        assert_eq!(record.status, JobStatus::Cancelled);
        assert_eq!(f.broker.depth().await.unwrap().in_flight, 0);
    }
}
