//! Tenant lifecycle routes for onboarding and offboarding workflows.

use crate::backend::TenantConnector;
use crate::handlers::tenant::{offboard, onboard, ping, status};
use crate::state::AppState;
use axum::{routing::get, Router};

pub fn tenant_routes<C: TenantConnector>(state: AppState<C>) -> Router {
    Router::new()
        .route(
            "/tenants/:tenant_id",
            get(status::<C>).post(onboard::<C>).delete(offboard::<C>),
        )
        .route("/tenant/ping", get(ping::<C>))
        .with_state(state)
}
