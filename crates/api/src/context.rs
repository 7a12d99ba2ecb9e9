//! Request-scoped tenancy context.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;
use std::str::FromStr;

use inspecta_core::TenantId;

use crate::app::errors::json_error;

/// Header carrying the caller's organization id.
///
/// Authentication itself is an upstream concern; by the time a request
/// reaches this subsystem the organization has been established and every
/// access check keys off it.
pub const ORGANIZATION_HEADER: &str = "x-organization-id";

/// Optional header carrying the acting user's id, recorded on jobs as
/// `created_by`.
pub const USER_HEADER: &str = "x-user-id";

/// Tenant context for a request.
///
/// This is immutable and must be present for all job routes.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TenantContext {
    tenant_id: TenantId,
}

impl TenantContext {
    pub fn new(tenant_id: TenantId) -> Self {
        Self { tenant_id }
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for TenantContext
where
    S: Send + Sync,
{
    type Rejection = axum::response::Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(ORGANIZATION_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                json_error(
                    StatusCode::UNAUTHORIZED,
                    "missing_organization",
                    format!("{ORGANIZATION_HEADER} header is required"),
                )
            })?;

        let tenant_id = TenantId::from_str(raw).map_err(|e| {
            json_error(StatusCode::BAD_REQUEST, "invalid_organization", e.to_string())
        })?;

        Ok(Self::new(tenant_id))
    }
}
