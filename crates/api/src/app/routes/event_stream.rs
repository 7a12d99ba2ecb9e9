//! Per-inspection real-time event stream (SSE).
//!
//! Each API process subscribes to the relay and re-emits frames to its
//! locally-connected clients whose inspection matches. There is no replay:
//! clients fetch current job state first, then follow the stream.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Extension, Path};
use axum::http::StatusCode;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tokio::sync::mpsc::unbounded_channel;
use tokio_stream::wrappers::UnboundedReceiverStream;
use uuid::Uuid;

use inspecta_analysis::{InspectionRepo, InspectionRepoError};
use inspecta_core::InspectionId;
use inspecta_events::{inspection_channel, MessageBus};

use crate::app::errors::json_error;
use crate::app::AppServices;
use crate::context::TenantContext;

pub fn router() -> Router {
    Router::new().route("/inspections/:id/events", get(stream_inspection_events))
}

/// GET /inspections/:id/events
async fn stream_inspection_events(
    Extension(services): Extension<Arc<AppServices>>,
    tenant: TenantContext,
    Path(id): Path<Uuid>,
) -> axum::response::Response {
    let inspection_id = InspectionId::from_uuid(id);

    match services.inspections.find(inspection_id).await {
        Ok(inspection) if inspection.organization_id == tenant.tenant_id() => {}
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

    let mut subscription = match services.bus.subscribe().await {
        Ok(s) => s,
        Err(e) => {
            return json_error(StatusCode::INTERNAL_SERVER_ERROR, "relay_error", e.to_string());
        }
    };

    let channel = inspection_channel(inspection_id);
    let (tx, rx) = unbounded_channel::<Result<SseEvent, Infallible>>();

    // Forward matching frames until the client goes away or the bus closes.
    tokio::spawn(async move {
        while let Some(frame) = subscription.recv().await {
            if frame.channel != channel {
                continue;
            }
            let event = SseEvent::default()
                .event(frame.event.clone())
                .data(frame.payload.to_string());
            if tx.send(Ok(event)).is_err() {
                break;
            }
        }
    });

    Sse::new(UnboundedReceiverStream::new(rx))
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
        .into_response()
}
