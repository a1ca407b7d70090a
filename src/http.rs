use crate::error::AppResult;
use crate::ingest::{IngestStats, IngestStatus};
use crate::query::{MetricReading, MetricsQuery};
use axum::extract::{Query, Request, State};
use axum::middleware::{from_fn, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

#[derive(Clone)]
pub struct HttpState {
    pub query: MetricsQuery,
    pub stats: Arc<IngestStats>,
}

#[derive(Debug, Deserialize)]
struct GetMetricParams {
    #[serde(alias = "switch")]
    entity_id: String,
    #[serde(alias = "metric")]
    metric_name: String,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    #[serde(flatten)]
    ingest: IngestStatus,
    generation: u64,
    entities: usize,
    snapshot_taken_at: Option<DateTime<Utc>>,
}

async fn healthz() -> &'static str {
    "ok"
}

async fn get_metric(
    State(state): State<HttpState>,
    Query(params): Query<GetMetricParams>,
) -> AppResult<Json<MetricReading>> {
    let reading = state
        .query
        .get_metric(&params.entity_id, &params.metric_name)?;
    Ok(Json(reading))
}

async fn list_metrics(State(state): State<HttpState>) -> Response {
    let snapshot = state.query.list_all();
    Json(&*snapshot).into_response()
}

async fn get_status(State(state): State<HttpState>) -> Json<StatusResponse> {
    let snapshot = state.query.list_all();
    Json(StatusResponse {
        ingest: state.stats.status(),
        generation: snapshot.generation(),
        entities: snapshot.len(),
        snapshot_taken_at: snapshot.taken_at(),
    })
}

async fn log_latency(request: Request, next: Next) -> Response {
    let started = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let response = next.run(request).await;
    tracing::info!(
        %method,
        %path,
        status = response.status().as_u16(),
        latency_ms = started.elapsed().as_secs_f64() * 1000.0,
        "request served"
    );
    response
}

pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/status", get(get_status))
        .route("/telemetry/GetMetric", get(get_metric))
        .route("/telemetry/ListMetrics", get(list_metrics))
        .layer(from_fn(log_latency))
        .with_state(state)
}
