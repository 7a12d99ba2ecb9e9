//! Job store contract and the in-memory implementation.
//!
//! Every mutating call loads the job, applies the lifecycle methods on
//! [`inspecta_core::Job`] (which enforce forward-only transitions, the
//! progress clamp, and the append-only event log), persists the result, and
//! publishes the updated job to the event relay. Relay publishes are
//! best-effort: a failed broadcast is logged, never bubbled — the store
//! remains the source of truth.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;

use inspecta_core::job::event_types;
use inspecta_core::{
    DomainError, Job, JobEventDraft, JobId, JobStatus, NewJob, ProgressUpdate,
};
use inspecta_events::{EventFrame, MessageBus};

#[derive(Debug, Error)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("job storage error: {0}")]
    Storage(String),
}

/// Per-status job counts for the operator status endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct JobStats {
    pub pending: usize,
    pub queued: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl JobStats {
    pub fn count(&mut self, status: JobStatus) {
        match status {
            JobStatus::Pending => self.pending += 1,
            JobStatus::Queued => self.queued += 1,
            JobStatus::Processing => self.processing += 1,
            JobStatus::Completed => self.completed += 1,
            JobStatus::Failed => self.failed += 1,
            JobStatus::Cancelled => self.cancelled += 1,
        }
    }
}

/// Durable record of async work and its history.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Initialize a job in `pending` with its `job.created` event.
    async fn create(&self, spec: NewJob) -> Result<Job, JobStoreError>;

    async fn get(&self, id: JobId) -> Result<Job, JobStoreError>;

    /// Append to the audit log, optionally mirroring a progress value.
    async fn append_event(&self, id: JobId, draft: JobEventDraft) -> Result<Job, JobStoreError>;

    /// Merge progress/status fields; stamps `started_at` on the transition
    /// to processing and `completed_at` on terminal transitions.
    async fn update_progress(
        &self,
        id: JobId,
        update: ProgressUpdate,
    ) -> Result<Job, JobStoreError>;

    async fn mark_queued(&self, id: JobId, queue_depth: Option<u64>)
        -> Result<Job, JobStoreError>;

    async fn mark_completed(
        &self,
        id: JobId,
        result: JsonValue,
        message: &str,
    ) -> Result<Job, JobStoreError>;

    async fn mark_failed(&self, id: JobId, error: &str) -> Result<Job, JobStoreError>;

    async fn mark_cancelled(&self, id: JobId, reason: &str) -> Result<Job, JobStoreError>;

    /// Jobs sitting in `queued` for longer than `older_than`, for the
    /// reconciliation sweep.
    async fn list_stale_queued(&self, older_than: Duration) -> Result<Vec<Job>, JobStoreError>;

    async fn stats(&self) -> Result<JobStats, JobStoreError>;
}

/// In-memory store for tests/dev and single-process deployments.
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
    relay: Arc<dyn MessageBus>,
}

impl InMemoryJobStore {
    pub fn new(relay: Arc<dyn MessageBus>) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            relay,
        }
    }

    async fn emit(&self, job: &Job, event: &str) {
        if let Err(e) = self.relay.publish(EventFrame::for_job(job, event)).await {
            tracing::warn!(job_id = %job.id, event, error = %e, "relay publish failed");
        }
    }

    /// Load, mutate, persist, broadcast. The relay event name is whatever
    /// audit entry the mutation appended last.
    async fn mutate<F>(&self, id: JobId, f: F) -> Result<Job, JobStoreError>
    where
        F: FnOnce(&mut Job) -> Result<(), DomainError>,
    {
        let job = {
            let mut jobs = self.jobs.write().await;
            let job = jobs.get_mut(&id).ok_or(JobStoreError::NotFound(id))?;
            f(job)?;
            job.clone()
        };
        let event = job
            .events
            .last()
            .map(|e| e.event_type.clone())
            .unwrap_or_else(|| event_types::JOB_PROGRESS.to_string());
        self.emit(&job, &event).await;
        Ok(job)
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, spec: NewJob) -> Result<Job, JobStoreError> {
        let job = Job::new(spec);
        self.jobs.write().await.insert(job.id, job.clone());
        self.emit(&job, event_types::JOB_CREATED).await;
        Ok(job)
    }

    async fn get(&self, id: JobId) -> Result<Job, JobStoreError> {
        self.jobs
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(JobStoreError::NotFound(id))
    }

    async fn append_event(&self, id: JobId, draft: JobEventDraft) -> Result<Job, JobStoreError> {
        self.mutate(id, |job| {
            job.push_event(draft);
            Ok(())
        })
        .await
    }

    async fn update_progress(
        &self,
        id: JobId,
        update: ProgressUpdate,
    ) -> Result<Job, JobStoreError> {
        self.mutate(id, |job| job.apply_progress(update)).await
    }

    async fn mark_queued(
        &self,
        id: JobId,
        queue_depth: Option<u64>,
    ) -> Result<Job, JobStoreError> {
        self.mutate(id, |job| job.mark_queued(queue_depth)).await
    }

    async fn mark_completed(
        &self,
        id: JobId,
        result: JsonValue,
        message: &str,
    ) -> Result<Job, JobStoreError> {
        self.mutate(id, |job| job.mark_completed(result, message)).await
    }

    async fn mark_failed(&self, id: JobId, error: &str) -> Result<Job, JobStoreError> {
        self.mutate(id, |job| job.mark_failed(error)).await
    }

    async fn mark_cancelled(&self, id: JobId, reason: &str) -> Result<Job, JobStoreError> {
        self.mutate(id, |job| job.mark_cancelled(reason)).await
    }

    async fn list_stale_queued(&self, older_than: Duration) -> Result<Vec<Job>, JobStoreError> {
        let cutoff = chrono::Utc::now()
            - chrono::Duration::from_std(older_than).unwrap_or_default();
        let jobs = self.jobs.read().await;
        let mut stale: Vec<Job> = jobs
            .values()
            .filter(|j| j.status == JobStatus::Queued && j.updated_at < cutoff)
            .cloned()
            .collect();
        stale.sort_by_key(|j| j.created_at);
        Ok(stale)
    }

    async fn stats(&self) -> Result<JobStats, JobStoreError> {
        let jobs = self.jobs.read().await;
        let mut stats = JobStats::default();
        for job in jobs.values() {
            stats.count(job.status);
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use inspecta_core::{InspectionId, TenantId};
    use inspecta_events::InMemoryBus;

    fn spec() -> NewJob {
        NewJob {
            inspection_id: InspectionId::new(),
            organization_id: TenantId::new(),
            job_type: "photo_analysis".to_string(),
            payload: serde_json::json!({"photo_ids": []}),
            total_units: 3,
            created_by: None,
        }
    }

    fn store_with_bus() -> (InMemoryJobStore, Arc<InMemoryBus>) {
        let bus = Arc::new(InMemoryBus::new());
        (InMemoryJobStore::new(bus.clone()), bus)
    }

    #[tokio::test]
    async fn create_yields_pending_with_one_created_event() {
        let (store, _bus) = store_with_bus();
        let job = store.create(spec()).await.unwrap();

        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.progress, 0);
        let created: Vec<_> = job
            .events
            .iter()
            .filter(|e| e.event_type == event_types::JOB_CREATED)
            .collect();
        assert_eq!(created.len(), 1);
    }

    #[tokio::test]
    async fn every_mutation_reaches_the_relay() {
        let (store, bus) = store_with_bus();
        let mut sub = bus.subscribe().await.unwrap();

        let job = store.create(spec()).await.unwrap();
        store.mark_queued(job.id, Some(0)).await.unwrap();
        store
            .update_progress(
                job.id,
                ProgressUpdate {
                    status: Some(JobStatus::Processing),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        store
            .mark_completed(job.id, JsonValue::Null, "done")
            .await
            .unwrap();

        let channel = inspecta_events::inspection_channel(job.inspection_id);
        let mut seen = Vec::new();
        while let Some(frame) = sub.try_recv() {
            assert_eq!(frame.channel, channel);
            seen.push(frame.event);
        }
        assert_eq!(
            seen,
            vec![
                event_types::JOB_CREATED,
                event_types::JOB_QUEUED,
                event_types::JOB_STARTED,
                event_types::JOB_COMPLETED,
            ]
        );
    }

    #[tokio::test]
    async fn unknown_job_is_not_found() {
        let (store, _bus) = store_with_bus();
        let id = JobId::new();
        assert!(matches!(
            store.get(id).await,
            Err(JobStoreError::NotFound(_))
        ));
        assert!(matches!(
            store.mark_failed(id, "x").await,
            Err(JobStoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn progress_is_clamped_on_write() {
        let (store, _bus) = store_with_bus();
        let job = store.create(spec()).await.unwrap();

        let updated = store
            .update_progress(
                job.id,
                ProgressUpdate {
                    progress: Some(250),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.progress, 100);

        let updated = store
            .update_progress(
                job.id,
                ProgressUpdate {
                    progress: Some(-5),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.progress, 0);
    }

    #[tokio::test]
    async fn mark_completed_twice_keeps_completed() {
        let (store, _bus) = store_with_bus();
        let job = store.create(spec()).await.unwrap();

        store
            .mark_completed(job.id, serde_json::json!({"n": 1}), "done")
            .await
            .unwrap();
        let second = store
            .mark_completed(job.id, serde_json::json!({"n": 1}), "done")
            .await
            .unwrap();
        assert_eq!(second.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn stale_queued_jobs_are_listed() {
        let (store, _bus) = store_with_bus();
        let job = store.create(spec()).await.unwrap();
        store.mark_queued(job.id, None).await.unwrap();

        // Zero threshold: everything queued counts as stale.
        let stale = store.list_stale_queued(Duration::ZERO).await.unwrap();
        assert_eq!(stale.len(), 1);

        let stale = store
            .list_stale_queued(Duration::from_secs(3600))
            .await
            .unwrap();
        assert!(stale.is_empty());
    }

    #[tokio::test]
    async fn stats_count_by_status() {
        let (store, _bus) = store_with_bus();
        let a = store.create(spec()).await.unwrap();
        let _b = store.create(spec()).await.unwrap();
        store.mark_queued(a.id, None).await.unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.queued, 1);
    }
}
