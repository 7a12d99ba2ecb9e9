//! The pluggable unit of domain work a worker executes.
//!
//! A handler owns its job's terminal success transition: it calls
//! `mark_completed` before returning `Ok`. The runtime owns everything
//! else — the transition to `processing`, failure recording, and message
//! settlement.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use thiserror::Error;

use inspecta_core::{InspectionId, JobId, ProgressUpdate, TenantId};

use crate::jobs::{JobStore, JobStoreError};

/// Input handed to a handler for one execution.
#[derive(Debug, Clone)]
pub struct HandlerContext {
    pub job_id: JobId,
    pub inspection_id: InspectionId,
    pub organization_id: TenantId,
    pub payload: JsonValue,
}

/// Domain failure during handler execution.
///
/// The message is recorded on the job verbatim for operator diagnosis;
/// the attempt is not retried at transport level.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct HandlerFailure {
    pub message: String,
}

impl HandlerFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// One progress report from a handler.
#[derive(Debug, Clone)]
pub struct ProgressReport {
    /// Percentage; out-of-range values are clamped by the store.
    pub progress: i32,
    pub message: String,
    /// Units finished so far, when the handler tracks them.
    pub processed_units: Option<u32>,
}

impl ProgressReport {
    pub fn new(progress: i32, message: impl Into<String>) -> Self {
        Self {
            progress,
            message: message.into(),
            processed_units: None,
        }
    }

    pub fn with_units(mut self, processed: u32) -> Self {
        self.processed_units = Some(processed);
        self
    }
}

/// Progress capability passed into a handler.
///
/// Handlers never capture ambient store state for progress; they report
/// through this interface and the runtime decides where reports land.
#[async_trait]
pub trait ProgressReporter: Send + Sync {
    async fn report(&self, report: ProgressReport) -> Result<(), JobStoreError>;
}

/// The production reporter: bound to `JobStore::update_progress` for one
/// job id.
pub struct StoreProgressReporter {
    store: Arc<dyn JobStore>,
    job_id: JobId,
}

impl StoreProgressReporter {
    pub fn new(store: Arc<dyn JobStore>, job_id: JobId) -> Self {
        Self { store, job_id }
    }
}

#[async_trait]
impl ProgressReporter for StoreProgressReporter {
    async fn report(&self, report: ProgressReport) -> Result<(), JobStoreError> {
        self.store
            .update_progress(
                self.job_id,
                ProgressUpdate {
                    progress: Some(report.progress),
                    message: Some(report.message),
                    processed_units: report.processed_units,
                    ..Default::default()
                },
            )
            .await?;
        Ok(())
    }
}

/// A unit of domain work, selected by `Job::job_type`.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Discriminator this handler is registered under.
    fn job_type(&self) -> &'static str;

    /// Execute one job. On success the handler has already called
    /// `mark_completed`; an `Err` is recorded via `mark_failed` by the
    /// runtime and the message is not redelivered.
    async fn run(
        &self,
        ctx: HandlerContext,
        progress: &dyn ProgressReporter,
    ) -> Result<(), HandlerFailure>;
}
