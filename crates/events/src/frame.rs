//! The wire envelope broadcast on the relay channel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use inspecta_core::{InspectionId, Job};

/// Channel name for a given inspection.
///
/// Subscriptions are keyed by the owning inspection, not by job id: one
/// inspection may have many jobs and clients typically watch the inspection.
pub fn inspection_channel(id: InspectionId) -> String {
    format!("inspection:{id}")
}

/// A single relay message: which channel it belongs to, what happened, and
/// the event payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventFrame {
    pub channel: String,
    pub event: String,
    pub payload: JsonValue,
    #[serde(default = "Utc::now")]
    pub emitted_at: DateTime<Utc>,
}

impl EventFrame {
    pub fn new(channel: impl Into<String>, event: impl Into<String>, payload: JsonValue) -> Self {
        Self {
            channel: channel.into(),
            event: event.into(),
            payload,
            emitted_at: Utc::now(),
        }
    }

    /// Frame carrying a full job snapshot, addressed to the job's
    /// inspection channel.
    pub fn for_job(job: &Job, event: impl Into<String>) -> Self {
        let payload = serde_json::to_value(job).unwrap_or(JsonValue::Null);
        Self::new(inspection_channel(job.inspection_id), event, payload)
    }
}
