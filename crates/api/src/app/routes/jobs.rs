//! Enqueue, read, and cancel analysis jobs.

use std::str::FromStr;
use std::sync::Arc;

use axum::extract::{Extension, Path};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use uuid::Uuid;

use inspecta_analysis::{InspectionRepo, InspectionRepoError};
use inspecta_core::{InspectionId, Job, JobId, NewJob, PhotoId, UserId};
use inspecta_infra::jobs::JobStore;
use inspecta_infra::worker::{AssignmentMode, PhotoAnalysisPayload, PHOTO_ANALYSIS};

use crate::app::errors::{gate_error_to_response, json_error, store_error_to_response};
use crate::app::AppServices;
use crate::context::{TenantContext, USER_HEADER};

pub fn router() -> Router {
    Router::new()
        .route("/inspections/:id/analysis-jobs", post(enqueue_analysis))
        .route("/jobs/:id", get(get_job))
        .route("/jobs/:id/cancel", post(cancel_job))
}

#[derive(Debug, Deserialize)]
pub struct EnqueueRequest {
    pub photo_ids: Vec<PhotoId>,
    pub mode: AssignmentMode,
    /// Numeric priority hint; lower runs sooner. Defaults to 0.
    #[serde(default)]
    pub priority: i64,
}

/// POST /inspections/:id/analysis-jobs
///
/// Creates the job record (`pending`) and submits it through the gate.
/// A saturated queue answers 503 and leaves the record in `pending` for a
/// later retry.
async fn enqueue_analysis(
    Extension(services): Extension<Arc<AppServices>>,
    tenant: TenantContext,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(req): Json<EnqueueRequest>,
) -> axum::response::Response {
    let inspection_id = InspectionId::from_uuid(id);
    let created_by = headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|raw| UserId::from_str(raw).ok());

    match services.inspections.find(inspection_id).await {
        Ok(inspection) if inspection.organization_id == tenant.tenant_id() => {}
        // Cross-tenant reads look identical to missing records.
        Ok(_) | Err(InspectionRepoError::NotFound(_)) => {
            return json_error(
                StatusCode::NOT_FOUND,
                "not_found",
                format!("inspection {inspection_id} not found"),
            );
        }
        Err(e) => {
            return json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", e.to_string());
        }
    }

    if req.photo_ids.is_empty() {
        return json_error(
            StatusCode::BAD_REQUEST,
            "empty_batch",
            "photo_ids must not be empty",
        );
    }

    let payload = PhotoAnalysisPayload {
        photo_ids: req.photo_ids.clone(),
        mode: req.mode,
    };
    let payload = match serde_json::to_value(&payload) {
        Ok(v) => v,
        Err(e) => {
            return json_error(StatusCode::INTERNAL_SERVER_ERROR, "encode_error", e.to_string());
        }
    };

    let job = match services
        .store
        .create(NewJob {
            inspection_id,
            organization_id: tenant.tenant_id(),
            job_type: PHOTO_ANALYSIS.to_string(),
            payload,
            total_units: req.photo_ids.len() as u32,
            created_by,
        })
        .await
    {
        Ok(job) => job,
        Err(e) => return store_error_to_response(e),
    };

    match services.gate.submit(&job, req.priority).await {
        Ok(queued) => (StatusCode::ACCEPTED, Json(queued)).into_response(),
        Err(e) => gate_error_to_response(e),
    }
}

/// GET /jobs/:id
async fn get_job(
    Extension(services): Extension<Arc<AppServices>>,
    tenant: TenantContext,
    Path(id): Path<Uuid>,
) -> axum::response::Response {
    match load_owned_job(&services, tenant, JobId::from_uuid(id)).await {
        Ok(job) => Json(job).into_response(),
        Err(response) => response,
    }
}

/// POST /jobs/:id/cancel
///
/// Writes the terminal `cancelled` status. A running handler observes the
/// cancellation only between units of work; a job that already finished
/// answers 409.
async fn cancel_job(
    Extension(services): Extension<Arc<AppServices>>,
    tenant: TenantContext,
    Path(id): Path<Uuid>,
) -> axum::response::Response {
    let job = match load_owned_job(&services, tenant, JobId::from_uuid(id)).await {
        Ok(job) => job,
        Err(response) => return response,
    };

    match services
        .store
        .mark_cancelled(job.id, "cancelled by user request")
        .await
    {
        Ok(cancelled) => Json(cancelled).into_response(),
        Err(e) => store_error_to_response(e),
    }
}

/// Fetch a job and hide records the caller's organization does not own.
async fn load_owned_job(
    services: &AppServices,
    tenant: TenantContext,
    id: JobId,
) -> Result<Job, axum::response::Response> {
    match services.store.get(id).await {
        Ok(job) if job.organization_id == tenant.tenant_id() => Ok(job),
        Ok(_) => Err(json_error(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("job not found: {id}"),
        )),
        Err(e) => Err(store_error_to_response(e)),
    }
}
