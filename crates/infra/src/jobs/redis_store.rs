//! Redis-backed job store.
//!
//! Each job is one JSON document at `{ns}:job:<id>`, with an index set at
//! `{ns}:index` for sweeps and stats. Mutations are read-modify-write:
//! safe because exactly one handler execution owns a job at a time and the
//! remaining writers (gate, cancel endpoint) touch disjoint lifecycle
//! phases; `events` only ever grows within the owning writer.

use async_trait::async_trait;
use redis::AsyncCommands;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Duration;

use inspecta_core::job::event_types;
use inspecta_core::{DomainError, Job, JobEventDraft, JobId, JobStatus, NewJob, ProgressUpdate};
use inspecta_events::{EventFrame, MessageBus};

use super::store::{JobStats, JobStore, JobStoreError};

pub struct RedisJobStore {
    client: redis::Client,
    key_prefix: String,
    relay: Arc<dyn MessageBus>,
}

impl RedisJobStore {
    pub fn new(
        redis_url: &str,
        key_prefix: impl Into<String>,
        relay: Arc<dyn MessageBus>,
    ) -> Result<Self, JobStoreError> {
        let client =
            redis::Client::open(redis_url).map_err(|e| JobStoreError::Storage(e.to_string()))?;
        Ok(Self {
            client,
            key_prefix: key_prefix.into(),
            relay,
        })
    }

    fn job_key(&self, id: JobId) -> String {
        format!("{}:job:{id}", self.key_prefix)
    }

    fn index_key(&self) -> String {
        format!("{}:index", self.key_prefix)
    }

    async fn conn(&self) -> Result<redis::aio::MultiplexedConnection, JobStoreError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| JobStoreError::Storage(e.to_string()))
    }

    async fn load(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        id: JobId,
    ) -> Result<Job, JobStoreError> {
        let raw: Option<String> = conn
            .get(self.job_key(id))
            .await
            .map_err(|e| JobStoreError::Storage(e.to_string()))?;
        let raw = raw.ok_or(JobStoreError::NotFound(id))?;
        serde_json::from_str(&raw).map_err(|e| JobStoreError::Storage(e.to_string()))
    }

    async fn save(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        job: &Job,
    ) -> Result<(), JobStoreError> {
        let raw =
            serde_json::to_string(job).map_err(|e| JobStoreError::Storage(e.to_string()))?;
        let _: () = conn
            .set(self.job_key(job.id), raw)
            .await
            .map_err(|e| JobStoreError::Storage(e.to_string()))?;
        Ok(())
    }

    async fn emit(&self, job: &Job) {
        let event = job
            .events
            .last()
            .map(|e| e.event_type.clone())
            .unwrap_or_else(|| event_types::JOB_PROGRESS.to_string());
        if let Err(e) = self.relay.publish(EventFrame::for_job(job, event)).await {
            tracing::warn!(job_id = %job.id, error = %e, "relay publish failed");
        }
    }

    async fn mutate<F>(&self, id: JobId, f: F) -> Result<Job, JobStoreError>
    where
        F: FnOnce(&mut Job) -> Result<(), DomainError>,
    {
        let mut conn = self.conn().await?;
        let mut job = self.load(&mut conn, id).await?;
        f(&mut job)?;
        self.save(&mut conn, &job).await?;
        self.emit(&job).await;
        Ok(job)
    }

    async fn all_jobs(&self) -> Result<Vec<Job>, JobStoreError> {
        let mut conn = self.conn().await?;
        let ids: Vec<String> = conn
            .smembers(self.index_key())
            .await
            .map_err(|e| JobStoreError::Storage(e.to_string()))?;

        let mut jobs = Vec::with_capacity(ids.len());
        for id in ids {
            let raw: Option<String> = conn
                .get(format!("{}:job:{id}", self.key_prefix))
                .await
                .map_err(|e| JobStoreError::Storage(e.to_string()))?;
            if let Some(raw) = raw {
                match serde_json::from_str::<Job>(&raw) {
                    Ok(job) => jobs.push(job),
                    Err(e) => {
                        tracing::warn!(job_id = %id, error = %e, "skipping undecodable job record")
                    }
                }
            }
        }
        Ok(jobs)
    }
}

#[async_trait]
impl JobStore for RedisJobStore {
    async fn create(&self, spec: NewJob) -> Result<Job, JobStoreError> {
        let job = Job::new(spec);
        let mut conn = self.conn().await?;
        self.save(&mut conn, &job).await?;
        let _: u64 = conn
            .sadd(self.index_key(), job.id.to_string())
            .await
            .map_err(|e| JobStoreError::Storage(e.to_string()))?;
        self.emit(&job).await;
        Ok(job)
    }

    async fn get(&self, id: JobId) -> Result<Job, JobStoreError> {
        let mut conn = self.conn().await?;
        self.load(&mut conn, id).await
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
        let cutoff =
            chrono::Utc::now() - chrono::Duration::from_std(older_than).unwrap_or_default();
        let mut stale: Vec<Job> = self
            .all_jobs()
            .await?
            .into_iter()
            .filter(|j| j.status == JobStatus::Queued && j.updated_at < cutoff)
            .collect();
        stale.sort_by_key(|j| j.created_at);
        Ok(stale)
    }

    async fn stats(&self) -> Result<JobStats, JobStoreError> {
        let mut stats = JobStats::default();
        for job in self.all_jobs().await? {
            stats.count(job.status);
        }
        Ok(stats)
    }
}
