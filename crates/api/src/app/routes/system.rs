//! Operator-facing health and queue status.

use std::sync::Arc;

use axum::extract::Extension;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};

use inspecta_infra::broker::Broker;
use inspecta_infra::jobs::JobStore;

use crate::app::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/system/health", get(health))
        .route("/system/queue", get(queue_status))
}

pub async fn health() -> StatusCode {
    StatusCode::OK
}

/// GET /system/queue
///
/// Read-only snapshot: broker depth + connectivity, and per-status job
/// counts. A broker that cannot answer reports `connected: false` rather
/// than failing the endpoint — that is the health signal.
pub async fn queue_status(
    Extension(services): Extension<Arc<AppServices>>,
) -> axum::response::Response {
    let (connected, depth) = match services.broker.depth().await {
        Ok(depth) => (true, depth),
        Err(e) => {
            tracing::warn!(error = %e, "broker unreachable for status check");
            (false, Default::default())
        }
    };

    let jobs = match services.store.stats().await {
        Ok(stats) => stats,
        Err(e) => {
            return crate::app::errors::json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "store_error",
                e.to_string(),
            );
        }
    };

    Json(serde_json::json!({
        "broker": {
            "connected": connected,
            "pending": depth.pending,
            "in_flight": depth.in_flight,
        },
        "jobs": jobs,
    }))
    .into_response()
}
