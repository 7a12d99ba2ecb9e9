//! Reference handler: photo classification + issue detection + space
//! regrouping for one inspection.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

use inspecta_analysis::{
    migrate_pending_photos, summarize_group, unit_progress, AnalysisTotals, InspectionRepo,
    VisionClient,
};
use inspecta_core::{JobStatus, PhotoId};

use crate::jobs::JobStore;

use super::handler::{
    HandlerContext, HandlerFailure, JobHandler, ProgressReport, ProgressReporter,
};

/// Job type this handler registers under.
pub const PHOTO_ANALYSIS: &str = "photo_analysis";

/// Space scope used for issue detection when a photo has no assignment in
/// direct mode.
const UNSCOPED_SPACE: &str = "General";

/// How photos get their space assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentMode {
    /// Spaces were assigned by the user; classification is skipped.
    Direct,
    /// Unassigned photos are classified, then moved out of the
    /// pending-classification holding group.
    AutoClassify,
}

/// Handler-specific job payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhotoAnalysisPayload {
    pub photo_ids: Vec<PhotoId>,
    pub mode: AssignmentMode,
}

pub struct PhotoAnalysisHandler {
    store: Arc<dyn JobStore>,
    inspections: Arc<dyn InspectionRepo>,
    vision: Arc<dyn VisionClient>,
}

impl PhotoAnalysisHandler {
    pub fn new(
        store: Arc<dyn JobStore>,
        inspections: Arc<dyn InspectionRepo>,
        vision: Arc<dyn VisionClient>,
    ) -> Self {
        Self {
            store,
            inspections,
            vision,
        }
    }
}

#[async_trait]
impl JobHandler for PhotoAnalysisHandler {
    fn job_type(&self) -> &'static str {
        PHOTO_ANALYSIS
    }

    async fn run(
        &self,
        ctx: HandlerContext,
        progress: &dyn ProgressReporter,
    ) -> Result<(), HandlerFailure> {
        let payload: PhotoAnalysisPayload = serde_json::from_value(ctx.payload.clone())
            .map_err(|e| HandlerFailure::new(format!("invalid photo analysis payload: {e}")))?;

        let mut inspection = self
            .inspections
            .find(ctx.inspection_id)
            .await
            .map_err(|e| HandlerFailure::new(e.to_string()))?;
        if inspection.organization_id != ctx.organization_id {
            return Err(HandlerFailure::new(format!(
                "inspection {} belongs to a different organization",
                ctx.inspection_id
            )));
        }

        let auto = payload.mode == AssignmentMode::AutoClassify;
        let total = payload.photo_ids.len();
        let mut analyzed: HashSet<PhotoId> = HashSet::with_capacity(total);

        for (i, photo_id) in payload.photo_ids.iter().copied().enumerate() {
            // Cheap cooperative-cancellation check between units; an
            // in-flight photo is never interrupted, and the terminal write
            // already happened elsewhere, so just stop.
            let current = self
                .store
                .get(ctx.job_id)
                .await
                .map_err(|e| HandlerFailure::new(e.to_string()))?;
            if current.status == JobStatus::Cancelled {
                tracing::info!(
                    job_id = %ctx.job_id,
                    analyzed = analyzed.len(),
                    "job cancelled, stopping between photos",
                );
                return Ok(());
            }

            let photo = inspection.find_photo_mut(photo_id).ok_or_else(|| {
                HandlerFailure::new(format!(
                    "photo {photo_id} not found on inspection {}",
                    ctx.inspection_id
                ))
            })?;

            if auto && photo.space.is_none() {
                let classified = self
                    .vision
                    .classify_space(photo_id)
                    .await
                    .map_err(|e| HandlerFailure::new(e.to_string()))?;
                photo.space = Some(classified.space);
            }

            let space = photo
                .space
                .clone()
                .unwrap_or_else(|| UNSCOPED_SPACE.to_string());
            let assessment = self
                .vision
                .assess_photo(photo_id, &space)
                .await
                .map_err(|e| HandlerFailure::new(e.to_string()))?;
            photo.condition = assessment.condition;
            photo.issues = assessment.issues;
            analyzed.insert(photo_id);

            progress
                .report(
                    ProgressReport::new(
                        i32::from(unit_progress(i, total)),
                        format!("analyzed photo {}/{total}", i + 1),
                    )
                    .with_units((i + 1) as u32),
                )
                .await
                .map_err(|e| HandlerFailure::new(e.to_string()))?;
        }

        if auto {
            let moved = migrate_pending_photos(&mut inspection);
            if moved > 0 {
                tracing::debug!(
                    inspection_id = %inspection.id,
                    moved,
                    "photos moved out of the holding group",
                );
            }
        }

        for group in inspection.space_groups.iter_mut() {
            if group.photos.iter().any(|p| analyzed.contains(&p.id)) {
                summarize_group(group);
            }
        }

        inspection.touch();
        self.inspections
            .persist(&inspection)
            .await
            .map_err(|e| HandlerFailure::new(e.to_string()))?;

        let totals = AnalysisTotals::of(&inspection, total as u32);
        let result =
            serde_json::to_value(totals).map_err(|e| HandlerFailure::new(e.to_string()))?;
        self.store
            .mark_completed(ctx.job_id, result, "analysis complete")
            .await
            .map_err(|e| HandlerFailure::new(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value as JsonValue;

    use inspecta_analysis::{InMemoryInspectionRepo, ScriptedOutcome, ScriptedVisionClient};
    use inspecta_core::inspection::PENDING_CLASSIFICATION;
    use inspecta_core::{
        Condition, Inspection, InspectionId, Issue, IssueSeverity, NewJob, Photo, TenantId,
    };
    use inspecta_events::InMemoryBus;

    use crate::jobs::InMemoryJobStore;
    use crate::worker::handler::StoreProgressReporter;

    struct Fixture {
        store: Arc<InMemoryJobStore>,
        repo: Arc<InMemoryInspectionRepo>,
        org: TenantId,
    }

    fn fixture() -> Fixture {
        Fixture {
            store: Arc::new(InMemoryJobStore::new(Arc::new(InMemoryBus::new()))),
            repo: InMemoryInspectionRepo::arc(),
            org: TenantId::new(),
        }
    }

    async fn job_for(
        f: &Fixture,
        inspection_id: InspectionId,
        payload: &PhotoAnalysisPayload,
    ) -> inspecta_core::Job {
        f.store
            .create(NewJob {
                inspection_id,
                organization_id: f.org,
                job_type: PHOTO_ANALYSIS.to_string(),
                payload: serde_json::to_value(payload).unwrap(),
                total_units: payload.photo_ids.len() as u32,
                created_by: None,
            })
            .await
            .unwrap()
    }

    fn ctx_for(job: &inspecta_core::Job) -> HandlerContext {
        HandlerContext {
            job_id: job.id,
            inspection_id: job.inspection_id,
            organization_id: job.organization_id,
            payload: job.payload.clone(),
        }
    }

    #[tokio::test]
    async fn auto_classified_photos_land_in_one_shared_group() {
        let f = fixture();
        let mut inspection = Inspection::new(f.org, "Unit 12");
        let a = PhotoId::new();
        let b = PhotoId::new();
        let holding = inspection.ensure_group(PENDING_CLASSIFICATION);
        holding.photos.push(Photo::unclassified(a));
        holding.photos.push(Photo::unclassified(b));
        let inspection_id = inspection.id;
        f.repo.insert(inspection).await;

        let vision = Arc::new(
            ScriptedVisionClient::new()
                .with_outcome(a, ScriptedOutcome::space("Sunroom", Condition::Good))
                .with_outcome(b, ScriptedOutcome::space("Sunroom", Condition::Poor)),
        );
        let handler = PhotoAnalysisHandler::new(f.store.clone(), f.repo.clone(), vision);

        let payload = PhotoAnalysisPayload {
            photo_ids: vec![a, b],
            mode: AssignmentMode::AutoClassify,
        };
        let job = job_for(&f, inspection_id, &payload).await;
        let reporter = StoreProgressReporter::new(f.store.clone(), job.id);

        handler.run(ctx_for(&job), &reporter).await.unwrap();

        let stored = f.repo.find(inspection_id).await.unwrap();
        assert!(stored.group(PENDING_CLASSIFICATION).is_none());
        let sunroom = stored.group("Sunroom").expect("one new group");
        assert_eq!(sunroom.photos.len(), 2);
        // (4 + 2) / 2 = 3: the rounded average of the two conditions.
        assert_eq!(sunroom.condition, Condition::Fair);

        let done = f.store.get(job.id).await.unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.result.as_ref().unwrap()["photos_processed"], 2);
    }

    #[tokio::test]
    async fn direct_mode_keeps_existing_assignments() {
        let f = fixture();
        let mut inspection = Inspection::new(f.org, "Unit 3");
        let photo_id = PhotoId::new();
        let office = inspection.ensure_group("Office");
        office.photos.push(Photo {
            id: photo_id,
            space: Some("Office".to_string()),
            condition: Condition::Unrated,
            issues: Vec::new(),
        });
        let inspection_id = inspection.id;
        f.repo.insert(inspection).await;

        // The script would classify this photo as a kitchen; direct mode
        // must never ask.
        let vision = Arc::new(ScriptedVisionClient::new().with_outcome(
            photo_id,
            ScriptedOutcome::space("Kitchen", Condition::Excellent).with_issue(Issue {
                severity: IssueSeverity::High,
                title: "Cracked window pane".to_string(),
                recommendation: "Replace the pane".to_string(),
            }),
        ));
        let handler = PhotoAnalysisHandler::new(f.store.clone(), f.repo.clone(), vision);

        let payload = PhotoAnalysisPayload {
            photo_ids: vec![photo_id],
            mode: AssignmentMode::Direct,
        };
        let job = job_for(&f, inspection_id, &payload).await;
        let reporter = StoreProgressReporter::new(f.store.clone(), job.id);

        handler.run(ctx_for(&job), &reporter).await.unwrap();

        let stored = f.repo.find(inspection_id).await.unwrap();
        let office = stored.group("Office").unwrap();
        assert_eq!(office.photos[0].space.as_deref(), Some("Office"));
        assert_eq!(office.photos[0].condition, Condition::Excellent);
        assert_eq!(office.actions, vec!["Replace the pane".to_string()]);
        assert!(stored.group("Kitchen").is_none());
    }

    #[tokio::test]
    async fn missing_inspection_fails_fast() {
        let f = fixture();
        let vision = Arc::new(ScriptedVisionClient::new());
        let handler = PhotoAnalysisHandler::new(f.store.clone(), f.repo.clone(), vision);

        let payload = PhotoAnalysisPayload {
            photo_ids: vec![],
            mode: AssignmentMode::Direct,
        };
        let job = job_for(&f, InspectionId::new(), &payload).await;
        let reporter = StoreProgressReporter::new(f.store.clone(), job.id);

        let err = handler.run(ctx_for(&job), &reporter).await.unwrap_err();
        assert!(err.message.contains("not found"));
    }

    #[tokio::test]
    async fn cancelled_job_stops_between_photos() {
        let f = fixture();
        let mut inspection = Inspection::new(f.org, "Unit 9");
        let photo_id = PhotoId::new();
        inspection
            .ensure_group(PENDING_CLASSIFICATION)
            .photos
            .push(Photo::unclassified(photo_id));
        let inspection_id = inspection.id;
        f.repo.insert(inspection).await;

        let vision = Arc::new(ScriptedVisionClient::new());
        let handler = PhotoAnalysisHandler::new(f.store.clone(), f.repo.clone(), vision.clone());

        let payload = PhotoAnalysisPayload {
            photo_ids: vec![photo_id],
            mode: AssignmentMode::AutoClassify,
        };
        let job = job_for(&f, inspection_id, &payload).await;
        f.store.mark_cancelled(job.id, "user cancel").await.unwrap();

        let reporter = StoreProgressReporter::new(f.store.clone(), job.id);
        handler.run(ctx_for(&job), &reporter).await.unwrap();

        // Nothing was analyzed and the terminal state stayed cancelled.
        assert!(vision.assessed().is_empty());
        let record = f.store.get(job.id).await.unwrap();
        assert_eq!(record.status, JobStatus::Cancelled);
        assert!(record.result.is_none());
    }

    #[tokio::test]
    async fn empty_payload_is_rejected() {
        let f = fixture();
        let vision = Arc::new(ScriptedVisionClient::new());
        let handler = PhotoAnalysisHandler::new(f.store.clone(), f.repo.clone(), vision);

        let job = f
            .store
            .create(NewJob {
                inspection_id: InspectionId::new(),
                organization_id: f.org,
                job_type: PHOTO_ANALYSIS.to_string(),
                payload: JsonValue::String("not an object".to_string()),
                total_units: 0,
                created_by: None,
            })
            .await
            .unwrap();
        let reporter = StoreProgressReporter::new(f.store.clone(), job.id);

        let err = handler.run(ctx_for(&job), &reporter).await.unwrap_err();
        assert!(err.message.contains("invalid photo analysis payload"));
    }
}
