//! Route assembly.

pub mod common;
pub mod tenant;

pub use common::common_routes;
pub use tenant::tenant_routes;

use crate::backend::TenantConnector;
use crate::state::AppState;
use axum::Router;
use tower_http::limit::RequestBodyLimitLayer;

/// Lifecycle requests carry no body worth more than this.
const MAX_BODY_BYTES: usize = 16 * 1024;

/// Common routes at the root and tenant routes under `/api/v1`.
pub fn app_routes<C: TenantConnector>(state: AppState<C>) -> Router {
    Router::new()
        .merge(common_routes(state.clone()))
        .nest("/api/v1", tenant_routes(state))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
}
