//! Tenant lifecycle handlers: onboarding, offboarding, status, and a per-tenant ping.

use crate::backend::TenantConnector;
use crate::error::TenancyError;
use crate::extractors::TenantHeader;
use crate::response::{success_one, success_one_ok};
use crate::state::AppState;
use crate::tenant::TenantId;
use axum::extract::{Path, State};
use axum::response::IntoResponse;

/// POST /tenants/:tenant_id. Creates the database and opens its handle.
pub async fn onboard<C: TenantConnector>(
    State(state): State<AppState<C>>,
    Path(tenant_id): Path<String>,
) -> Result<impl IntoResponse, TenancyError> {
    let tenant = TenantId::parse(&tenant_id)?;
    state.router.create_database(&tenant).await?;
    state.router.get_or_create(&tenant).await?;
    Ok(success_one(state.router.status(&tenant)))
}

/// DELETE /tenants/:tenant_id. Irrecoverably drops the tenant database.
pub async fn offboard<C: TenantConnector>(
    State(state): State<AppState<C>>,
    Path(tenant_id): Path<String>,
) -> Result<impl IntoResponse, TenancyError> {
    let tenant = TenantId::parse(&tenant_id)?;
    state.router.drop_database(&tenant).await?;
    Ok(success_one_ok(state.router.status(&tenant)))
}

pub async fn status<C: TenantConnector>(
    State(state): State<AppState<C>>,
    Path(tenant_id): Path<String>,
) -> Result<impl IntoResponse, TenancyError> {
    let tenant = TenantId::parse(&tenant_id)?;
    Ok(success_one_ok(state.router.status(&tenant)))
}

/// GET /tenant/ping with `X-Tenant-ID`: the path a business request takes to its handle.
pub async fn ping<C: TenantConnector>(
    State(state): State<AppState<C>>,
    TenantHeader(tenant): TenantHeader,
) -> Result<impl IntoResponse, TenancyError> {
    let handle = state.router.get_or_create(&tenant).await?;
    state.router.ping(&handle).await?;
    Ok(success_one_ok(serde_json::json!({
        "tenant_id": tenant,
        "database": "ok"
    })))
}
