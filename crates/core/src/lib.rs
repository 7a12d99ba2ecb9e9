//! `inspecta-core` — domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! strongly-typed identifiers, the domain error model, the [`Job`] lifecycle
//! entity, and the inspection/photo/space-group model the analysis jobs
//! operate on.

pub mod condition;
pub mod error;
pub mod id;
pub mod inspection;
pub mod job;

pub use condition::Condition;
pub use error::{DomainError, DomainResult};
pub use id::{InspectionId, JobId, PhotoId, TenantId, UserId};
pub use inspection::{Inspection, Issue, IssueSeverity, Photo, SpaceGroup};
pub use job::{Job, JobEvent, JobEventDraft, JobStatus, NewJob, ProgressUpdate};
