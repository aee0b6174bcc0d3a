//! Integration tests for the controller API endpoints

use axum::{
    http::{Request, StatusCode},
    response::IntoResponse,
    routing::get,
    body::Body,
    Json, Router,
};
use controller_lib::ControllerMetrics;
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use tower::ServiceExt;

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(HealthResponse { status: "ok" }))
}

async fn metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
}

fn create_test_router() -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
}

#[tokio::test]
async fn test_healthz_returns_ok() {
    let app = create_test_router();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/healthz")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let health: serde_json::Value = serde_json::from_slice(&body).unwrap();

    assert_eq!(health["status"], "ok");
}

#[tokio::test]
async fn test_metrics_exposition_includes_cycle_counters() {
    let controller_metrics = ControllerMetrics::new();
    controller_metrics.record_task_execution(true);
    controller_metrics.record_sampling("api-gateway", "cluster-001", 2.0, 1.0, 50.0);

    let app = create_test_router();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let exposition = String::from_utf8(body.to_vec()).unwrap();

    assert!(exposition.contains("log_budget_controller_task_executions_total"));
    assert!(exposition.contains("log_budget_controller_log_sampling_info"));
    assert!(exposition.contains("metric_type=\"sampling_percentage\""));
}
