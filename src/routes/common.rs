//! Common routes: health, readiness, version.

use crate::backend::TenantConnector;
use crate::state::AppState;
use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
}

#[derive(Serialize)]
struct ReadyBody {
    status: &'static str,
    control_plane: &'static str,
}

async fn health() -> Json<HealthBody> {
    Json(HealthBody { status: "ok" })
}

async fn ready<C: TenantConnector>(State(state): State<AppState<C>>) -> (StatusCode, Json<ReadyBody>) {
    if state.router.ping_control_plane().await {
        (
            StatusCode::OK,
            Json(ReadyBody {
                status: "ok",
                control_plane: "ok",
            }),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadyBody {
                status: "degraded",
                control_plane: "unavailable",
            }),
        )
    }
}

async fn version() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// GET /health, GET /ready (control-plane check), GET /version.
pub fn common_routes<C: TenantConnector>(state: AppState<C>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready::<C>))
        .route("/version", get(version))
        .with_state(state)
}
