mod common;

use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use common::*;
use serde_json::Value;
use tenant_router::{app_routes, AppState};
use tower::ServiceExt;

fn app(h: &Harness) -> Router {
    app_routes(AppState {
        router: h.router.clone(),
    })
}

async fn send(app: &Router, method: Method, uri: &str, tenant_header: Option<&str>) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    if let Some(id) = tenant_header {
        request = request.header("X-Tenant-ID", id);
    }
    let response = app
        .clone()
        .oneshot(request.body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

#[tokio::test]
async fn onboard_then_conflict() {
    let h = harness(&[]);
    let app = app(&h);

    let (status, body) = send(&app, Method::POST, "/api/v1/tenants/acme", None).await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["data"]["tenant_id"], "acme");
    assert_eq!(body["data"]["database"], "provisioned");
    assert_eq!(body["data"]["handle_open"], true);
    assert!(h.control.has(&db("acme")));

    let (status, body) = send(&app, Method::POST, "/api/v1/tenants/acme", None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "provisioning_conflict");
}

#[tokio::test]
async fn ping_routes_by_header() {
    let h = harness(&[&db("acme")]);
    let app = app(&h);

    let (status, body) = send(&app, Method::GET, "/api/v1/tenant/ping", Some("acme")).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["tenant_id"], "acme");
    assert_eq!(body["data"]["database"], "ok");

    let (status, body) = send(&app, Method::GET, "/api/v1/tenant/ping", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "invalid_tenant_id");

    let (status, body) = send(&app, Method::GET, "/api/v1/tenant/ping", Some("nobody")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "tenant_not_provisioned");
}

#[tokio::test]
async fn invalid_tenant_ids_are_rejected() {
    let h = harness(&[]);
    let app = app(&h);

    let (status, body) = send(&app, Method::POST, "/api/v1/tenants/bad_id", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "invalid_tenant_id");

    let (status, _) = send(&app, Method::GET, "/api/v1/tenant/ping", Some("a;DROP")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(h.control.creates.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[tokio::test]
async fn offboard_drops_database() {
    let h = harness(&[]);
    let app = app(&h);
    send(&app, Method::POST, "/api/v1/tenants/acme", None).await;

    let (status, body) = send(&app, Method::DELETE, "/api/v1/tenants/acme", None).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["database"], "absent");
    assert_eq!(body["data"]["handle_open"], false);
    assert!(!h.control.has(&db("acme")));

    let (status, body) = send(&app, Method::GET, "/api/v1/tenants/acme", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["database"], "absent");
}

#[tokio::test]
async fn health_and_readiness() {
    let h = harness(&[]);
    let app = app(&h);

    let (status, body) = send(&app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, body) = send(&app, Method::GET, "/ready", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["control_plane"], "ok");

    let (status, body) = send(&app, Method::GET, "/version", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "tenant-router");

    h.router.close_all().await.unwrap();
    let (status, body) = send(&app, Method::GET, "/ready", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "degraded");
}
