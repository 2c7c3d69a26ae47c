//! HTTP API: alert operations, thresholds, event ingestion, health and metrics

use std::future::Future;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use monitor_lib::{
    ActivityEvent, AlertError, AlertFilter, AnomalyEngine, InMemoryMetricsSource,
    ThresholdCategory, ThresholdError, TrendPeriod, TriggerOutcome, UserRecord,
};
use prometheus::{Encoder, TextEncoder};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

/// Actor recorded when a request names none
pub const DEFAULT_ACTOR: &str = "system";

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<AnomalyEngine>,
    /// Ingestion target for activity events and user records
    pub source: Arc<InMemoryMetricsSource>,
}

impl AppState {
    pub fn new(engine: Arc<AnomalyEngine>, source: Arc<InMemoryMetricsSource>) -> Self {
        Self { engine, source }
    }
}

/// JSON error body `{code, message}`
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, code, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({"code": self.code, "message": self.message})),
        )
            .into_response()
    }
}

impl From<AlertError> for ApiError {
    fn from(err: AlertError) -> Self {
        let (status, code) = match &err {
            AlertError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            AlertError::AlreadyResolved(_) => (StatusCode::CONFLICT, "already_resolved"),
            AlertError::InvalidActor => (StatusCode::BAD_REQUEST, "invalid_actor"),
        };
        Self::new(status, code, err.to_string())
    }
}

impl From<ThresholdError> for ApiError {
    fn from(err: ThresholdError) -> Self {
        Self::bad_request("invalid_thresholds", err.to_string())
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ---- health and metrics ----

/// 200 while operational, 503 when a component is unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.engine.health().health().await;
    let status_code = if health.status.is_operational() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status_code, Json(health))
}

async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.engine.health().readiness().await;
    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status_code, Json(readiness))
}

async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        return ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "metrics_encoding",
            e.to_string(),
        )
        .into_response();
    }
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

// ---- anomalies ----

async fn active_anomalies(State(state): State<Arc<AppState>>) -> Json<Value> {
    let anomalies = state.engine.list_active_alerts();
    Json(json!({
        "anomalies": anomalies,
        "count": anomalies.len(),
        "timestamp": Utc::now(),
    }))
}

async fn list_anomalies(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<AlertFilter>,
) -> Json<Value> {
    let anomalies = state.engine.list_alerts(&filter);
    Json(json!({
        "anomalies": anomalies,
        "count": anomalies.len(),
    }))
}

async fn anomaly_stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.engine.stats())
}

#[derive(Debug, Deserialize)]
struct TrendsQuery {
    period: Option<String>,
}

async fn anomaly_trends(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TrendsQuery>,
) -> ApiResult<Json<Value>> {
    let period = match query.period.as_deref() {
        Some(raw) => raw
            .parse::<TrendPeriod>()
            .map_err(|e| ApiError::bad_request("invalid_period", e))?,
        None => TrendPeriod::default(),
    };
    Ok(Json(json!({
        "period": period,
        "trends": state.engine.trends(period),
    })))
}

async fn anomaly_config(State(state): State<Arc<AppState>>) -> Json<Value> {
    let config = state.engine.config();
    Json(json!({
        "thresholds": &*state.engine.thresholds(),
        "scanIntervalSecs": config.scan_interval.as_secs(),
        "baselineIntervalSecs": config.baseline_interval.as_secs(),
        "retentionIntervalSecs": config.retention_interval.as_secs(),
        "alertRetentionSecs": config.alert_retention.as_secs(),
        "autoResolveSecs": config.auto_resolve_after.as_secs(),
    }))
}

#[derive(Debug, Default, Deserialize)]
struct AcknowledgeRequest {
    #[serde(default)]
    actor: Option<String>,
}

async fn acknowledge(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Option<Json<AcknowledgeRequest>>,
) -> ApiResult<impl IntoResponse> {
    let actor = body
        .and_then(|Json(req)| req.actor)
        .filter(|a| !a.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_ACTOR.to_string());
    let alert = state.engine.acknowledge(&id, &actor)?;
    Ok(Json(alert))
}

#[derive(Debug, Deserialize)]
struct ResolveRequest {
    #[serde(default)]
    resolution: String,
}

async fn resolve(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<ResolveRequest>,
) -> ApiResult<impl IntoResponse> {
    if req.resolution.trim().is_empty() {
        return Err(ApiError::bad_request(
            "resolution_required",
            "resolution text is required",
        ));
    }
    let alert = state.engine.resolve(&id, &req.resolution)?;
    Ok(Json(alert))
}

async fn trigger_scan(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.engine.trigger_scan() {
        TriggerOutcome::Accepted(_) => (StatusCode::ACCEPTED, Json(json!({"status": "accepted"}))),
        TriggerOutcome::AlreadyRunning => (
            StatusCode::CONFLICT,
            Json(json!({"status": "already_running"})),
        ),
    }
}

// ---- thresholds ----

async fn get_thresholds(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!(&*state.engine.thresholds()))
}

async fn get_threshold_category(
    State(state): State<Arc<AppState>>,
    Path(category): Path<String>,
) -> ApiResult<Json<Value>> {
    let parsed: ThresholdCategory = serde_json::from_value(Value::String(category.clone()))
        .map_err(|_| {
            ApiError::new(
                StatusCode::NOT_FOUND,
                "unknown_category",
                format!("unknown threshold category {}", category),
            )
        })?;
    Ok(Json(state.engine.threshold_category(parsed)))
}

async fn update_thresholds(
    State(state): State<Arc<AppState>>,
    Json(patch): Json<Value>,
) -> ApiResult<Json<Value>> {
    let updated = state.engine.update_thresholds(&patch)?;
    Ok(Json(json!(&*updated)))
}

// ---- ingestion ----

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum EventBatch {
    One(ActivityEvent),
    Many(Vec<ActivityEvent>),
}

async fn ingest_events(
    State(state): State<Arc<AppState>>,
    Json(batch): Json<EventBatch>,
) -> impl IntoResponse {
    let events = match batch {
        EventBatch::One(event) => vec![event],
        EventBatch::Many(events) => events,
    };
    let accepted = events.len();
    state.source.record_many(events).await;
    (StatusCode::ACCEPTED, Json(json!({"accepted": accepted})))
}

async fn upsert_user(
    State(state): State<Arc<AppState>>,
    Json(user): Json<UserRecord>,
) -> StatusCode {
    state.source.upsert_user(user).await;
    StatusCode::NO_CONTENT
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/anomalies", get(list_anomalies))
        .route("/anomalies/active", get(active_anomalies))
        .route("/anomalies/stats", get(anomaly_stats))
        .route("/anomalies/trends", get(anomaly_trends))
        .route("/anomalies/config", get(anomaly_config))
        .route("/anomalies/scan", post(trigger_scan))
        .route("/anomalies/:id/acknowledge", post(acknowledge))
        .route("/anomalies/:id/resolve", post(resolve))
        .route("/thresholds", get(get_thresholds).put(update_thresholds))
        .route("/thresholds/:category", get(get_threshold_category))
        .route("/events", post(ingest_events))
        .route("/users", post(upsert_user));

    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .nest("/api/v1", api)
        .with_state(state)
}

/// Serve the API until `shutdown` completes
pub async fn serve(
    port: u16,
    state: Arc<AppState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}
