//! Worker execution: handler contract, runtime loop, and the
//! photo-analysis reference handler.

pub mod handler;
pub mod photo;
pub mod runtime;

pub use handler::{
    HandlerContext, HandlerFailure, JobHandler, ProgressReport, ProgressReporter,
    StoreProgressReporter,
};
pub use photo::{AssignmentMode, PhotoAnalysisHandler, PhotoAnalysisPayload, PHOTO_ANALYSIS};
pub use runtime::{WorkerConfig, WorkerRuntime};
