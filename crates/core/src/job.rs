//! Background job entity and lifecycle state machine.
//!
//! A [`Job`] is the durable record of one unit of asynchronous work: its
//! status, its progress counters, and an append-only audit log of
//! [`JobEvent`]s. All lifecycle mutations go through the methods here so the
//! rules hold for every store implementation:
//!
//! - status moves forward only (cancellation is the one cross-cut),
//! - `events` only ever grows,
//! - `progress` is clamped to `0..=100` on every write,
//! - `organization_id` never changes after creation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{DomainError, DomainResult};
use crate::id::{InspectionId, JobId, TenantId, UserId};

/// Event-type names recorded in the job audit log and broadcast to
/// real-time subscribers.
pub mod event_types {
    /// Job record created (`status = pending`).
    pub const JOB_CREATED: &str = "job.created";

    /// Job admitted by the gate and published to the broker.
    pub const JOB_QUEUED: &str = "job.queued";

    /// Job re-published by the reconciliation sweep.
    pub const JOB_REQUEUED: &str = "job.requeued";

    /// Worker picked the job up (`status = processing`).
    pub const JOB_STARTED: &str = "job.started";

    /// Incremental progress update during execution.
    pub const JOB_PROGRESS: &str = "job.progress";

    /// Job completed successfully.
    pub const JOB_COMPLETED: &str = "job.completed";

    /// Job failed with an error.
    pub const JOB_FAILED: &str = "job.failed";

    /// Job was cancelled (by user or system).
    pub const JOB_CANCELLED: &str = "job.cancelled";
}

/// Job execution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Record exists, not yet admitted to the broker.
    Pending,
    /// Published to the broker, waiting for a worker.
    Queued,
    /// Owned by exactly one in-flight handler execution.
    Processing,
    /// Finished successfully; `result` is set.
    Completed,
    /// Finished with an error; `last_error` is set.
    Failed,
    /// Terminated externally; a running handler observes this only between
    /// units of work.
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Position in the forward-only lifecycle. Terminal states share a rank.
    fn rank(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Queued => 1,
            Self::Processing => 2,
            Self::Completed | Self::Failed | Self::Cancelled => 3,
        }
    }

    /// Whether a transition from `self` to `next` is legal.
    ///
    /// Forward moves are allowed (including skips, e.g. a worker picking up
    /// a job that was never observed in `queued`). Cancellation is allowed
    /// from any non-terminal state. Re-asserting the same terminal state is
    /// a no-op (idempotent completion), but crossing between distinct
    /// terminal states is not.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        if *self == next {
            return true;
        }
        if self.is_terminal() {
            return false;
        }
        if next == JobStatus::Cancelled {
            return true;
        }
        next.rank() > self.rank()
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// One entry in a job's append-only audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEvent {
    pub event_type: String,
    pub message: String,
    pub progress: Option<u8>,
    #[serde(default)]
    pub metadata: JsonValue,
    pub created_at: DateTime<Utc>,
}

/// Input for appending an audit-log entry.
#[derive(Debug, Clone, Default)]
pub struct JobEventDraft {
    pub event_type: String,
    pub message: String,
    pub progress: Option<i32>,
    pub metadata: Option<JsonValue>,
}

impl JobEventDraft {
    pub fn new(event_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            message: message.into(),
            progress: None,
            metadata: None,
        }
    }

    pub fn with_progress(mut self, progress: i32) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_metadata(mut self, metadata: JsonValue) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Specification for creating a new job.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub inspection_id: InspectionId,
    pub organization_id: TenantId,
    pub job_type: String,
    pub payload: JsonValue,
    pub total_units: u32,
    pub created_by: Option<UserId>,
}

/// Partial update merged into a job by `JobStore::update_progress`.
#[derive(Debug, Clone, Default)]
pub struct ProgressUpdate {
    pub processed_units: Option<u32>,
    pub total_units: Option<u32>,
    /// Accepts out-of-range input; clamped to `0..=100` on write.
    pub progress: Option<i32>,
    pub status: Option<JobStatus>,
    pub message: Option<String>,
}

/// Clamp an externally supplied percentage into the stored range.
pub fn clamp_progress(value: i32) -> u8 {
    value.clamp(0, 100) as u8
}

/// A persisted unit of asynchronous work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub inspection_id: InspectionId,
    pub organization_id: TenantId,
    pub job_type: String,
    pub status: JobStatus,
    pub progress: u8,
    pub processed_units: u32,
    pub total_units: u32,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub payload: JsonValue,
    pub result: Option<JsonValue>,
    pub events: Vec<JobEvent>,
    pub created_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a job in `pending` with a single `job.created` audit entry.
    pub fn new(spec: NewJob) -> Self {
        let now = Utc::now();
        let mut job = Self {
            id: JobId::new(),
            inspection_id: spec.inspection_id,
            organization_id: spec.organization_id,
            job_type: spec.job_type,
            status: JobStatus::Pending,
            progress: 0,
            processed_units: 0,
            total_units: spec.total_units,
            attempts: 0,
            last_error: None,
            payload: spec.payload,
            result: None,
            events: Vec::new(),
            created_by: spec.created_by,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        };
        job.push_event(JobEventDraft::new(event_types::JOB_CREATED, "job created"));
        job
    }

    /// Append an audit entry and optionally mirror its progress value into
    /// the top-level counter.
    pub fn push_event(&mut self, draft: JobEventDraft) {
        let now = Utc::now();
        let progress = draft.progress.map(clamp_progress);
        if let Some(p) = progress {
            self.progress = p;
        }
        self.events.push(JobEvent {
            event_type: draft.event_type,
            message: draft.message,
            progress,
            metadata: draft.metadata.unwrap_or(JsonValue::Null),
            created_at: now,
        });
        self.updated_at = now;
    }

    fn transition_to(&mut self, next: JobStatus) -> DomainResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(DomainError::illegal_transition(format!(
                "job {} cannot move {} -> {}",
                self.id, self.status, next
            )));
        }
        let now = Utc::now();
        if next == JobStatus::Processing && self.status != JobStatus::Processing {
            self.started_at.get_or_insert(now);
            self.attempts += 1;
        }
        if next.is_terminal() {
            self.completed_at.get_or_insert(now);
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }

    /// Merge a partial progress update, enforcing transition rules and the
    /// progress clamp. Emits a `job.progress` (or `job.started`) audit entry.
    pub fn apply_progress(&mut self, update: ProgressUpdate) -> DomainResult<()> {
        let started = matches!(update.status, Some(JobStatus::Processing))
            && self.status != JobStatus::Processing;
        if let Some(status) = update.status {
            self.transition_to(status)?;
        }
        if let Some(total) = update.total_units {
            self.total_units = total;
        }
        if let Some(processed) = update.processed_units {
            self.processed_units = processed;
        }
        if let Some(progress) = update.progress {
            self.progress = clamp_progress(progress);
        }

        let event_type = if started {
            event_types::JOB_STARTED
        } else {
            event_types::JOB_PROGRESS
        };
        let message = update
            .message
            .unwrap_or_else(|| format!("{}/{} units", self.processed_units, self.total_units));
        self.push_event(
            JobEventDraft::new(event_type, message).with_progress(i32::from(self.progress)),
        );
        Ok(())
    }

    /// Move to `queued`, recording the observed broker depth.
    pub fn mark_queued(&mut self, queue_depth: Option<u64>) -> DomainResult<()> {
        self.transition_to(JobStatus::Queued)?;
        let mut draft = JobEventDraft::new(event_types::JOB_QUEUED, "queued for processing");
        if let Some(depth) = queue_depth {
            draft = draft.with_metadata(serde_json::json!({ "queue_depth": depth }));
        }
        self.push_event(draft);
        Ok(())
    }

    /// Terminal success. Safe to call twice: the second call re-asserts
    /// `completed` and appends another audit entry, nothing else.
    pub fn mark_completed(&mut self, result: JsonValue, message: &str) -> DomainResult<()> {
        self.transition_to(JobStatus::Completed)?;
        self.progress = 100;
        self.result = Some(result);
        self.push_event(JobEventDraft::new(event_types::JOB_COMPLETED, message).with_progress(100));
        Ok(())
    }

    /// Terminal failure; captures the error text verbatim.
    pub fn mark_failed(&mut self, error: &str) -> DomainResult<()> {
        self.transition_to(JobStatus::Failed)?;
        self.last_error = Some(error.to_string());
        self.push_event(JobEventDraft::new(event_types::JOB_FAILED, error));
        Ok(())
    }

    /// Terminal cancellation. A running handler observes this only at its
    /// next between-units status check.
    pub fn mark_cancelled(&mut self, reason: &str) -> DomainResult<()> {
        self.transition_to(JobStatus::Cancelled)?;
        self.push_event(JobEventDraft::new(event_types::JOB_CANCELLED, reason));
        Ok(())
    }
}
