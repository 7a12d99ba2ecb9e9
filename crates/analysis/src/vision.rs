//! Vision-model contract.
//!
//! The actual model calls (space classification, issue detection) are an
//! external collaborator. Handlers consume them through this trait and
//! never know which provider sits behind it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use inspecta_core::{Condition, Issue, PhotoId};

/// Vision-call failure.
///
/// Either kind is terminal for the running attempt; the worker records it
/// on the job rather than retrying at transport level.
#[derive(Debug, Error)]
pub enum VisionError {
    #[error("vision provider unavailable: {0}")]
    Unavailable(String),

    #[error("photo {0} could not be analyzed: {1}")]
    Rejected(PhotoId, String),
}

/// Result of classifying which space a photo shows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpaceClassification {
    /// Resolved space name, e.g. `"Kitchen"`.
    pub space: String,
    pub confidence: f64,
}

/// Result of assessing a photo within a known space type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhotoAssessment {
    pub condition: Condition,
    pub issues: Vec<Issue>,
}

/// Asynchronous vision-model calls used inside the photo-analysis handler.
#[async_trait]
pub trait VisionClient: Send + Sync {
    /// Classify which space type a photo shows.
    async fn classify_space(&self, photo: PhotoId) -> Result<SpaceClassification, VisionError>;

    /// Detect issues on a photo, scoped to its resolved space type.
    async fn assess_photo(
        &self,
        photo: PhotoId,
        space: &str,
    ) -> Result<PhotoAssessment, VisionError>;
}
