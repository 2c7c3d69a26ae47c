//! Integration tests for the monitor API endpoints

use std::sync::Arc;

use anomaly_monitor::api::{create_router, AppState};
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::Utc;
use monitor_lib::{
    ActivityEvent, AlertStatus, AnomalyEngine, EventKind, InMemoryMetricsSource, LogNotifier,
    ProcessStats, ScanOutcome,
};
use serde_json::{json, Value};
use tower::ServiceExt;

fn setup(stats: ProcessStats) -> (Router, Arc<AppState>) {
    let source = Arc::new(InMemoryMetricsSource::new().with_process_stats(stats));
    let engine = AnomalyEngine::builder()
        .source(source.clone())
        .notifier(Arc::new(LogNotifier))
        .instance("api-test")
        .build()
        .unwrap();
    let state = Arc::new(AppState::new(engine, source));
    (create_router(Arc::clone(&state)), state)
}

fn calm() -> ProcessStats {
    ProcessStats {
        used_bytes: 100,
        limit_bytes: 1000,
    }
}

fn hot() -> ProcessStats {
    ProcessStats {
        used_bytes: 950,
        limit_bytes: 1000,
    }
}

async fn body_json(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn send_json(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// Run a scan and return the id of the first alert it raised
async fn scan_for_alert(state: &AppState) -> String {
    match state.engine.run_scan().await {
        ScanOutcome::Completed(report) => report.alerts[0].id.clone(),
        other => panic!("scan did not complete: {:?}", other),
    }
}

#[tokio::test]
async fn test_readyz_before_start() {
    let (app, _) = setup(calm());

    let response = app.oneshot(get("/readyz")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let json = body_json(response).await;
    assert_eq!(json["ready"], false);
}

#[tokio::test]
async fn test_healthz_after_start() {
    let (app, state) = setup(calm());
    let handles = state.engine.start().await;

    let response = app.clone().oneshot(get("/healthz")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.oneshot(get("/readyz")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    state.engine.shutdown().await;
    for handle in handles {
        handle.await.unwrap();
    }
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let (app, state) = setup(hot());
    scan_for_alert(&state).await;

    let response = app.oneshot(get("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("anomaly_monitor_scans_completed_total"));
}

#[tokio::test]
async fn test_active_anomalies_after_scan() {
    let (app, state) = setup(hot());
    scan_for_alert(&state).await;

    let response = app.oneshot(get("/api/v1/anomalies/active")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["count"], 1);
    assert_eq!(json["anomalies"][0]["detectorType"], "high_memory_usage");
    assert_eq!(json["anomalies"][0]["status"], "active");
    assert!(json["timestamp"].is_string());
}

#[tokio::test]
async fn test_list_filters_by_status() {
    let (app, state) = setup(hot());
    let id = scan_for_alert(&state).await;
    state.engine.resolve(&id, "scaled up").unwrap();

    let response = app
        .clone()
        .oneshot(get("/api/v1/anomalies?status=resolved"))
        .await
        .unwrap();
    let json = body_json(response).await;
    assert_eq!(json["count"], 1);

    let response = app
        .oneshot(get("/api/v1/anomalies?status=active"))
        .await
        .unwrap();
    let json = body_json(response).await;
    assert_eq!(json["count"], 0);
}

#[tokio::test]
async fn test_acknowledge_defaults_actor() {
    let (app, state) = setup(hot());
    let id = scan_for_alert(&state).await;

    let request = Request::builder()
        .method("POST")
        .uri(format!("/api/v1/anomalies/{}/acknowledge", id))
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "acknowledged");
    assert_eq!(json["acknowledgedBy"], "system");
}

#[tokio::test]
async fn test_acknowledge_with_actor() {
    let (app, state) = setup(hot());
    let id = scan_for_alert(&state).await;

    let response = app
        .oneshot(send_json(
            "POST",
            &format!("/api/v1/anomalies/{}/acknowledge", id),
            json!({"actor": "oncall"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        state.engine.get_alert(&id).unwrap().acknowledged_by.as_deref(),
        Some("oncall")
    );
}

#[tokio::test]
async fn test_acknowledge_unknown_alert() {
    let (app, _) = setup(calm());

    let response = app
        .oneshot(send_json(
            "POST",
            "/api/v1/anomalies/missing/acknowledge",
            json!({"actor": "oncall"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let json = body_json(response).await;
    assert_eq!(json["code"], "not_found");
}

#[tokio::test]
async fn test_resolve_requires_resolution() {
    let (app, state) = setup(hot());
    let id = scan_for_alert(&state).await;

    let response = app
        .clone()
        .oneshot(send_json(
            "POST",
            &format!("/api/v1/anomalies/{}/resolve", id),
            json!({"resolution": "  "}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .clone()
        .oneshot(send_json(
            "POST",
            &format!("/api/v1/anomalies/{}/resolve", id),
            json!({"resolution": "restarted worker"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        state.engine.get_alert(&id).unwrap().status,
        AlertStatus::Resolved
    );

    // Resolving twice conflicts
    let response = app
        .oneshot(send_json(
            "POST",
            &format!("/api/v1/anomalies/{}/resolve", id),
            json!({"resolution": "again"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_trigger_scan_accepted() {
    let (app, state) = setup(hot());

    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/anomalies/scan")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let json = body_json(response).await;
    assert_eq!(json["status"], "accepted");

    // Let the background scan finish
    for _ in 0..100 {
        if !state.engine.is_scanning() && !state.engine.store().is_empty() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(state.engine.store().len(), 1);
}

#[tokio::test]
async fn test_stats_and_trends() {
    let (app, state) = setup(hot());
    scan_for_alert(&state).await;

    let response = app
        .clone()
        .oneshot(get("/api/v1/anomalies/stats"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["alerts"]["total"], 1);
    assert!(json["lastScan"].is_string());

    let response = app
        .clone()
        .oneshot(get("/api/v1/anomalies/trends?period=24h"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["period"], "24h");
    assert_eq!(json["trends"][0]["total"], 1);

    let response = app
        .oneshot(get("/api/v1/anomalies/trends?period=1y"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_threshold_update_and_lookup() {
    let (app, _) = setup(calm());

    let response = app
        .clone()
        .oneshot(send_json(
            "PUT",
            "/api/v1/thresholds",
            json!({"security": {"maxFailedLoginsPerUser": 3}}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["security"]["maxFailedLoginsPerUser"], 3);
    assert_eq!(json["performance"]["slowQueryThresholdMs"], 2000);

    let response = app
        .clone()
        .oneshot(get("/api/v1/thresholds/security"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["maxFailedLoginsPerUser"], 3);

    let response = app
        .clone()
        .oneshot(get("/api/v1/thresholds/unknown"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .oneshot(send_json("PUT", "/api/v1/thresholds", json!([1, 2])))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_config_endpoint() {
    let (app, _) = setup(calm());

    let response = app.oneshot(get("/api/v1/anomalies/config")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["scanIntervalSecs"], 30);
    assert_eq!(json["thresholds"]["loginFrequency"]["maxLoginsPerMinute"], 10);
}

#[tokio::test]
async fn test_ingested_events_feed_detectors() {
    let (app, state) = setup(calm());
    let now = Utc::now();

    let events: Vec<ActivityEvent> = (0..6)
        .map(|_| ActivityEvent::new("mallory", EventKind::LoginFailed, now).with_ip("10.0.0.9"))
        .collect();
    let response = app
        .clone()
        .oneshot(send_json("POST", "/api/v1/events", json!(events)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(body_json(response).await["accepted"], 6);

    let single = ActivityEvent::new("alice", EventKind::Login, now);
    let response = app
        .clone()
        .oneshot(send_json("POST", "/api/v1/events", json!(single)))
        .await
        .unwrap();
    assert_eq!(body_json(response).await["accepted"], 1);
    assert_eq!(state.source.event_count().await, 7);

    let response = app
        .oneshot(send_json(
            "POST",
            "/api/v1/users",
            json!({"userId": "alice", "lastLogin": now}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let ScanOutcome::Completed(report) = state.engine.run_scan().await else {
        panic!("scan did not complete");
    };
    let brute_force = report
        .alerts
        .iter()
        .find(|a| a.subject.as_deref() == Some("mallory"))
        .expect("brute force alert for mallory");
    assert_eq!(brute_force.severity, monitor_lib::Severity::Critical);
}
