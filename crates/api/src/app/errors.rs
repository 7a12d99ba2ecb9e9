//! HTTP error mapping for orchestration failures.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use inspecta_core::DomainError;
use inspecta_infra::gate::GateError;
use inspecta_infra::jobs::JobStoreError;

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

/// A rejected enqueue is retryable (503); transport failures during the
/// synchronous publish surface as a bad gateway.
pub fn gate_error_to_response(err: GateError) -> axum::response::Response {
    match err {
        GateError::Saturated { .. } => {
            json_error(StatusCode::SERVICE_UNAVAILABLE, "queue_saturated", err.to_string())
        }
        GateError::Store(e) => store_error_to_response(e),
        GateError::Transport(e) => {
            json_error(StatusCode::BAD_GATEWAY, "transport_error", e.to_string())
        }
    }
}

pub fn store_error_to_response(err: JobStoreError) -> axum::response::Response {
    match err {
        JobStoreError::NotFound(_) => json_error(StatusCode::NOT_FOUND, "not_found", err.to_string()),
        JobStoreError::Domain(DomainError::IllegalTransition(msg)) => {
            json_error(StatusCode::CONFLICT, "conflict", msg)
        }
        JobStoreError::Domain(e) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "domain_error", e.to_string())
        }
        JobStoreError::Storage(msg) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", msg)
        }
    }
}
