//! Admission control for new jobs.
//!
//! The gate guards the broker backlog, not job execution: before publishing
//! it checks the pending depth and sheds load once the configured ceiling
//! is hit. The depth check is unsynchronized across concurrent publishers —
//! coarse load shedding, not a hard limit.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use inspecta_core::job::event_types;
use inspecta_core::{Job, JobEventDraft};

use crate::broker::{Broker, BrokerError, JobMessage, PublishOptions};
use crate::jobs::{JobStore, JobStoreError};

#[derive(Debug, Error)]
pub enum GateError {
    /// Backlog at or over the ceiling; the caller should retry with
    /// backoff. No job was queued and no message was published.
    #[error("queue saturated: {pending} pending >= {max_pending} max")]
    Saturated { pending: u64, max_pending: u64 },

    #[error(transparent)]
    Store(#[from] JobStoreError),

    #[error(transparent)]
    Transport(#[from] BrokerError),
}

impl GateError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Saturated { .. })
    }
}

pub struct BackpressureGate {
    broker: Arc<dyn Broker>,
    store: Arc<dyn JobStore>,
    max_pending: u64,
}

impl BackpressureGate {
    pub fn new(broker: Arc<dyn Broker>, store: Arc<dyn JobStore>, max_pending: u64) -> Self {
        Self {
            broker,
            store,
            max_pending,
        }
    }

    /// Admit a pending job: depth check, then `mark_queued`, then publish.
    ///
    /// The depth check happens before the publish so the queue never grows
    /// unbounded under load; the check-then-act window is an accepted race.
    /// If the publish fails after `mark_queued` succeeded the job is left
    /// `queued` with no broker message — [`Self::requeue_stale`] reconciles
    /// that gap; the store write is never reversed.
    pub async fn submit(&self, job: &Job, priority: i64) -> Result<Job, GateError> {
        let depth = self.broker.depth().await?;
        if depth.pending >= self.max_pending {
            tracing::warn!(
                job_id = %job.id,
                pending = depth.pending,
                max_pending = self.max_pending,
                "admission rejected, queue saturated",
            );
            return Err(GateError::Saturated {
                pending: depth.pending,
                max_pending: self.max_pending,
            });
        }

        let queued = self.store.mark_queued(job.id, Some(depth.pending)).await?;
        let message = JobMessage::from_job(&queued);
        self.broker
            .publish(&message, PublishOptions { priority })
            .await?;

        tracing::info!(
            job_id = %queued.id,
            job_type = %queued.job_type,
            queue_depth = depth.pending,
            "job queued",
        );
        Ok(queued)
    }

    /// Re-publish jobs stuck in `queued` longer than `older_than`.
    ///
    /// Safe to run blind: on backends with dedup keys a re-publish of a
    /// message that did land is a no-op, and job execution is idempotent at
    /// the lifecycle level (a second delivery of a finished job is acked
    /// and skipped by the worker).
    pub async fn requeue_stale(&self, older_than: Duration) -> Result<usize, GateError> {
        let stale = self.store.list_stale_queued(older_than).await?;
        let mut requeued = 0usize;
        for job in stale {
            let message = JobMessage::from_job(&job);
            self.broker
                .publish(&message, PublishOptions::default())
                .await?;
            self.store
                .append_event(
                    job.id,
                    JobEventDraft::new(event_types::JOB_REQUEUED, "re-published after stale queue entry"),
                )
                .await?;
            requeued += 1;
            tracing::info!(job_id = %job.id, "stale queued job re-published");
        }
        Ok(requeued)
    }
}
