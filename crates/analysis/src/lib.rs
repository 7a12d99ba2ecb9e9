//! Photo-analysis domain logic.
//!
//! This crate holds the pieces the photo-processing job handler is built
//! from: the opaque vision-model contract ([`VisionClient`]), the
//! inspection persistence collaborator ([`InspectionRepo`]), and the pure
//! aggregation functions that turn per-photo findings into space-group
//! condition summaries. The handler itself lives in `inspecta-infra`
//! alongside the worker runtime that executes it.

pub mod aggregate;
pub mod repo;
pub mod scripted;
pub mod vision;

pub use aggregate::{migrate_pending_photos, summarize_group, unit_progress, AnalysisTotals};
pub use repo::{InMemoryInspectionRepo, InspectionRepo, InspectionRepoError};
pub use scripted::{ScriptedOutcome, ScriptedVisionClient};
pub use vision::{PhotoAssessment, SpaceClassification, VisionClient, VisionError};
