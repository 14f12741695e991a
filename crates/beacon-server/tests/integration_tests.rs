//! Integration tests for the Beacon HTTP service

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use beacon_domain::{FixedClock, RiskStore};
use beacon_engine::delivery_channel;
use beacon_server::{
    build_state,
    config::ServerConfig,
    handlers::{create_router, ErrorResponse, HealthCheckResponse, SampleResponse},
};
use beacon_store::SqliteStore;
use chrono::{TimeZone, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt; // for oneshot

/// Helper to create a router over an in-memory store and a fixed clock
fn create_test_app() -> Router {
    let config = ServerConfig::default_test_config();
    let store: Arc<dyn RiskStore> = Arc::new(SqliteStore::open(":memory:").unwrap());
    let clock = Arc::new(FixedClock::new(
        Utc.with_ymd_and_hms(2024, 3, 10, 9, 0, 0).unwrap(),
    ));
    let (queue, _rx) = delivery_channel();
    create_router(build_state(&config, store, queue, clock))
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn enroll(app: &Router, id: &str) {
    let (status, _) = send(
        app,
        "POST",
        "/students",
        Some(json!({"id": id, "gradeLevel": 9, "enrolledAt": "2024-01-08T08:00:00Z"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
}

fn error_kind(body: Value) -> String {
    let error: ErrorResponse = serde_json::from_value(body).unwrap();
    assert!(!error.message.is_empty());
    error.error
}

#[tokio::test]
async fn test_health_check_endpoint() {
    let app = create_test_app();
    enroll(&app, "S-100").await;

    let (status, body) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);

    let health: HealthCheckResponse = serde_json::from_value(body).unwrap();
    assert_eq!(health.status, "healthy");
    assert_eq!(health.student_count, 1);
    assert_eq!(health.active_alerts, 0);
    assert_eq!(health.intervention_count, 0);
}

#[tokio::test]
async fn test_enroll_get_and_archive_student() {
    let app = create_test_app();
    enroll(&app, "S-100").await;

    let (status, body) = send(&app, "GET", "/students/S-100", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["gradeLevel"], 9);

    let (status, body) = send(
        &app,
        "POST",
        "/students",
        Some(json!({"id": "S-100", "gradeLevel": 10})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(error_kind(body), "ConcurrentModification");

    let (status, body) = send(&app, "POST", "/students/S-100/archive", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(!body["archivedAt"].is_null());

    let (status, body) = send(&app, "GET", "/students/S-404", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error_kind(body), "NotFound");
}

#[tokio::test]
async fn test_risk_profile_requires_history() {
    let app = create_test_app();
    enroll(&app, "S-100").await;

    let (status, body) = send(&app, "GET", "/students/S-100/risk-profile", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error_kind(body), "NotFound");
}

#[tokio::test]
async fn test_factor_sample_out_of_range_is_rejected() {
    let app = create_test_app();
    enroll(&app, "S-100").await;

    let (status, body) = send(
        &app,
        "POST",
        "/students/S-100/factor-samples",
        Some(json!({"kind": "attendance", "value": 120.0, "observedAt": "2024-03-04T08:00:00Z"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_kind(body), "InvalidValue");

    let (status, _) = send(&app, "GET", "/students/S-100/risk-profile", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_factor_sample_for_unknown_student() {
    let app = create_test_app();

    let (status, body) = send(
        &app,
        "POST",
        "/students/S-404/factor-samples",
        Some(json!({"kind": "attendance", "value": 80.0, "observedAt": "2024-03-04T08:00:00Z"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error_kind(body), "NotFound");
}

#[tokio::test]
async fn test_malformed_body_is_invalid_value() {
    let app = create_test_app();

    let request = Request::builder()
        .method("POST")
        .uri("/students")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let (status, body) = send(&app, "GET", "/alerts/not-a-uuid", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_kind(body), "InvalidValue");
}

#[tokio::test]
async fn test_attendance_drop_alert_lifecycle() {
    let app = create_test_app();
    enroll(&app, "S-100").await;

    let (status, _) = send(
        &app,
        "POST",
        "/students/S-100/factor-samples",
        Some(json!({"kind": "attendance", "value": 95.0, "observedAt": "2024-03-04T08:00:00Z"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(
        &app,
        "POST",
        "/students/S-100/factor-samples",
        Some(json!({"kind": "attendance", "value": 70.0, "observedAt": "2024-03-06T08:00:00Z"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let recorded: SampleResponse = serde_json::from_value(body).unwrap();
    assert_eq!(recorded.sample.value, 70.0);
    assert_eq!(recorded.profile.student_id.as_str(), "S-100");

    let drop = recorded
        .alerts
        .iter()
        .find(|a| a.alert_type.as_str() == "attendance-drop")
        .expect("attendance drop alert");
    let alert_id = drop.id.to_string();

    let (status, body) = send(
        &app,
        "GET",
        "/alerts?status=active&type=attendance-drop&studentId=S-100",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let listed = body.as_array().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["id"], alert_id.as_str());

    let (status, body) = send(
        &app,
        "POST",
        &format!("/alerts/{}/assign", alert_id),
        Some(json!({"assignee": "counselor-1"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["assignedTo"], "counselor-1");

    let (status, body) = send(
        &app,
        "POST",
        &format!("/alerts/{}/transition", alert_id),
        Some(json!({"to": "resolved", "actor": "counselor-1"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "resolved");

    let (status, body) = send(
        &app,
        "POST",
        &format!("/alerts/{}/transition", alert_id),
        Some(json!({"to": "active"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(error_kind(body), "InvalidTransition");
}

#[tokio::test]
async fn test_alert_listing_respects_limit() {
    let app = create_test_app();
    for id in ["S-1", "S-2", "S-3"] {
        enroll(&app, id).await;
        let (status, _) = send(
            &app,
            "POST",
            &format!("/students/{}/factor-samples", id),
            Some(json!({"kind": "behavioral", "value": 10.0, "observedAt": "2024-03-04T08:00:00Z"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, body) = send(&app, "GET", "/alerts?type=behavioral-incident&limit=2", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 2);

    let (status, body) = send(&app, "GET", "/alerts?status=bogus", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_kind(body), "InvalidValue");
}

#[tokio::test]
async fn test_intervention_versioning_and_budget() {
    let app = create_test_app();
    enroll(&app, "S-100").await;

    let (status, body) = send(
        &app,
        "POST",
        "/interventions",
        Some(json!({
            "title": "Reading tutoring",
            "type": "academic-tutoring",
            "studentIds": ["S-100"],
            "staff": ["t-42"],
            "startDate": "2024-03-11",
            "budget": 100.0
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "planning");
    assert_eq!(body["version"], 1);
    let id = body["id"].as_str().unwrap().to_string();

    let (status, body) = send(
        &app,
        "POST",
        &format!("/interventions/{}/transition", id),
        Some(json!({"to": "active", "version": 1})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["version"], 2);

    let (status, body) = send(
        &app,
        "PATCH",
        &format!("/interventions/{}/progress", id),
        Some(json!({"progress": 40.0, "outcome": {"improved": 1, "noChange": 1}, "version": 2})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["version"], 3);

    let (status, body) = send(
        &app,
        "PATCH",
        &format!("/interventions/{}/progress", id),
        Some(json!({"progress": 60.0, "version": 2})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(error_kind(body), "ConcurrentModification");

    let (status, body) = send(
        &app,
        "POST",
        &format!("/interventions/{}/expenses", id),
        Some(json!({"amount": 150.0, "version": 3})),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(error_kind(body), "BudgetExceeded");

    let (status, body) = send(
        &app,
        "POST",
        &format!("/interventions/{}/budget", id),
        Some(json!({"budget": 200.0, "version": 3})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["version"], 4);

    let (status, body) = send(
        &app,
        "POST",
        &format!("/interventions/{}/expenses", id),
        Some(json!({"amount": 150.0, "version": 4})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["spent"], 150.0);

    let (status, body) = send(
        &app,
        "GET",
        &format!("/interventions/{}/effectiveness", id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "measured");
    assert_eq!(body["successRate"], 0.5);
}

#[tokio::test]
async fn test_intervention_for_unknown_student() {
    let app = create_test_app();

    let (status, body) = send(
        &app,
        "POST",
        "/interventions",
        Some(json!({
            "title": "Mentoring",
            "type": "mentoring",
            "studentIds": ["S-404"],
            "startDate": "2024-03-11"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error_kind(body), "NotFound");
}

#[tokio::test]
async fn test_cohort_trends() {
    let app = create_test_app();
    enroll(&app, "S-100").await;
    let (status, _) = send(
        &app,
        "POST",
        "/students/S-100/factor-samples",
        Some(json!({"kind": "academic", "value": 30.0, "observedAt": "2024-02-12T08:00:00Z"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(
        &app,
        "GET",
        "/cohort/trends?from=2024-01-01T00:00:00Z&to=2024-03-01T00:00:00Z",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let points = body.as_array().unwrap();
    assert_eq!(points.len(), 3);
    assert_eq!(points[0]["enrolled"], 1);
    assert_eq!(points[0]["unscored"], 1);
    assert_eq!(points[1]["unscored"], 0);

    let (status, body) = send(
        &app,
        "GET",
        "/cohort/trends?from=2024-03-01T00:00:00Z&to=2024-01-01T00:00:00Z",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_kind(body), "InvalidValue");
}
